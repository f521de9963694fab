//! Error types for configuration file resolution and persistence.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result alias used throughout the crate.
pub type ConfigFileResult<T> = Result<T, ConfigFileError>;

/// Errors raised while resolving, booting from, or committing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    // ------------------------------------------------------------------
    // Resolution (fatal at boot)
    // ------------------------------------------------------------------
    /// The configuration directory does not exist or is not a directory.
    #[error("directory not found: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    /// Canonicalising a resolved path failed.
    #[error("failed to resolve canonical path of {}: {source}", path.display())]
    CanonicalPath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No file with the given history suffix exists in the searched directory.
    #[error("no configuration file ending in '{suffix}' found in {}", dir.display())]
    BackupNotFound { suffix: String, dir: PathBuf },

    /// More than one file matched a name, suffix, or prefix.
    #[error("ambiguous configuration file name '{name}': {} files in {} match", candidates.len(), dir.display())]
    Ambiguous {
        name: String,
        dir: PathBuf,
        candidates: Vec<String>,
    },

    /// A history file is named exactly like the bare suffix and has no base name.
    #[error("configuration file name not allowed: '.{backup_type}.xml' has no base name")]
    NameNotAllowed { backup_type: String },

    /// The main configuration file could not be determined.
    #[error("main configuration file '{name}' not found in {}", dir.display())]
    MainFileNotFound { name: String, dir: PathBuf },

    /// A required file does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// The NEW policy refuses to boot from a non-empty existing file.
    #[error("cannot overwrite non-empty file {}", path.display())]
    NonEmptyFile { path: PathBuf },

    /// A path expected to be a directory is something else.
    #[error("not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    /// Creating a file or directory failed.
    #[error("cannot create {}: {source}", path.display())]
    CannotCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Deleting a file failed.
    #[error("cannot delete {}: {source}", path.display())]
    CannotDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ------------------------------------------------------------------
    // Commit (fatal to one transaction)
    // ------------------------------------------------------------------
    /// The codec failed to marshal the model; no file was touched.
    #[error("failed to marshal configuration: {0}")]
    Marshal(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The codec failed to parse the boot file.
    #[error("failed to parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The commit target exists but cannot be written.
    #[error("permission denied: {} is not writable", path.display())]
    PermissionDenied { path: PathBuf },

    /// Renaming the staged temp file over the target failed.
    #[error("failed to commit {} from {}: {source}", target.display(), temp.display())]
    CommitFailed {
        temp: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Rotating the previous configuration into the history failed.
    #[error("failed to back up {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Copying the boot file into the history failed.
    #[error("failed to create configuration history for {}: {source}", path.display())]
    History {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Renaming a history directory failed.
    #[error("cannot rename {} to {}: {source}", from.display(), to.display())]
    CannotRename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Taking a snapshot failed.
    #[error("failed to take snapshot of {} to {}: {source}", from.display(), to.display())]
    Snapshot {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshots are only taken once the configuration has booted.
    #[error("cannot take snapshot of {}: boot not completed", path.display())]
    BootNotCompleted { path: PathBuf },

    /// No snapshot starts with the given prefix.
    #[error("no snapshot starting with '{prefix}' found in {}", dir.display())]
    SnapshotNotFound { prefix: String, dir: PathBuf },

    /// `commit()` was called on a handle that was already committed or rolled back.
    #[error("rollback already invoked")]
    RollbackAlreadyInvoked,

    /// Any other file I/O failure.
    #[error("file io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigFileError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn canonical(path: &Path, source: std::io::Error) -> Self {
        Self::CanonicalPath {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn ambiguous(name: &str, dir: &Path, candidates: Vec<String>) -> Self {
        Self::Ambiguous {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            candidates,
        }
    }

    /// True for errors that should abort a boot rather than a single transaction.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound { .. }
                | Self::CanonicalPath { .. }
                | Self::BackupNotFound { .. }
                | Self::Ambiguous { .. }
                | Self::NameNotAllowed { .. }
                | Self::MainFileNotFound { .. }
                | Self::FileNotFound { .. }
                | Self::NonEmptyFile { .. }
                | Self::NotADirectory { .. }
                | Self::CannotCreate { .. }
                | Self::CannotDelete { .. }
        )
    }
}
