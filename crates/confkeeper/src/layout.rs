//! Physical layout of a configuration directory and its history.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{ConfigFileError, ConfigFileResult};
use crate::naming;

/// Paths derived from the configuration directory and the raw file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLayout {
    pub configuration_dir: PathBuf,
    pub raw_file_name: String,
    /// `{configuration_dir}/{raw name with '.' → '_'}_history`
    pub history_root: PathBuf,
    /// `{history_root}/current`
    pub current_history: PathBuf,
    /// `{history_root}/snapshot`
    pub snapshots_dir: PathBuf,
}

impl ConfigLayout {
    pub fn new(configuration_dir: &Path, raw_file_name: &str) -> Self {
        let history_root = configuration_dir.join(naming::history_dir_name(raw_file_name));
        Self {
            configuration_dir: configuration_dir.to_path_buf(),
            raw_file_name: raw_file_name.to_string(),
            current_history: history_root.join(naming::CURRENT_HISTORY_DIR),
            snapshots_dir: history_root.join(naming::SNAPSHOT_DIR),
            history_root,
        }
    }

    /// `{history_root}/{stem}.{alias}.xml`
    pub fn alias_file(&self, main_file_name: &str, alias: &str) -> PathBuf {
        self.history_root
            .join(naming::insert_suffix(main_file_name, alias))
    }

    /// `{current_history}/{stem}.v{n}.xml`
    pub fn versioned_file(&self, main_file_name: &str, n: u64) -> PathBuf {
        self.current_history
            .join(naming::versioned_name(main_file_name, n))
    }

    /// `{current_history}/{stem}.{version}.xml` for an alias such as `v3`.
    pub fn version_alias_file(&self, main_file_name: &str, version: &str) -> PathBuf {
        self.current_history
            .join(naming::insert_suffix(main_file_name, version))
    }
}

/// File name of `path` as UTF-8, or an empty string.
pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

/// Sorted entry names of `dir`. A missing directory lists as empty; entries
/// with non UTF-8 names are skipped.
pub(crate) fn list_names(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Failed to list directory");
            return Vec::new();
        }
    };
    names.sort();
    names
}

/// Canonical absolute form of `path`.
///
/// A file that does not exist yet is resolved through its parent directory so
/// the result stays stable once the file is created.
pub fn canonical_path(path: &Path) -> ConfigFileResult<PathBuf> {
    if path.exists() {
        return path
            .canonicalize()
            .map_err(|e| ConfigFileError::canonical(path, e));
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().ok_or_else(|| {
        ConfigFileError::canonical(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        )
    })?;
    let parent = parent
        .canonicalize()
        .map_err(|e| ConfigFileError::canonical(path, e))?;
    Ok(parent.join(file_name))
}
