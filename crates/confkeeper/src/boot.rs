//! Choosing the file a boot (or reload) parses, and applying the interaction
//! policy to it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigFileError, ConfigFileResult};
use crate::layout::ConfigLayout;
use crate::naming;
use crate::policy::InteractionPolicy;
use crate::resolver::NameResolver;

/// Resolution state of the boot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootFile {
    Unresolved,
    Resolved(PathBuf),
}

/// Mutable boot bookkeeping, always accessed under the owning mutex.
#[derive(Debug)]
pub struct BootState {
    pub file: BootFile,
    /// Set by the first reload and never cleared.
    pub reset: bool,
    /// A read-only reload should boot from the history `last` file.
    pub reuse_last: bool,
    /// Boot file requested for the next reload; consumed on resolution.
    pub pending_name: Option<String>,
}

impl BootState {
    pub fn new() -> Self {
        Self {
            file: BootFile::Unresolved,
            reset: false,
            reuse_last: false,
            pending_name: None,
        }
    }

    /// Forget the resolved file so the next access resolves again.
    pub fn reset(&mut self, reuse_last: bool, new_boot_file_name: Option<&str>) {
        self.file = BootFile::Unresolved;
        self.reset = true;
        self.reuse_last = reuse_last;
        if let Some(name) = new_boot_file_name {
            self.pending_name = Some(name.to_string());
        }
    }
}

impl Default for BootState {
    fn default() -> Self {
        Self::new()
    }
}

/// Selects the boot file for one [`ConfigurationFile`](crate::ConfigurationFile).
pub struct BootFileSelector<'a> {
    pub layout: &'a ConfigLayout,
    pub policy: InteractionPolicy,
    pub main_file: &'a Path,
    /// Name given at construction (alias or raw file name).
    pub boot_file_name: &'a str,
}

impl BootFileSelector<'_> {
    /// Return the cached boot file, resolving it first if needed.
    pub fn select(&self, state: &mut BootState) -> ConfigFileResult<PathBuf> {
        if let BootFile::Resolved(path) = &state.file {
            return Ok(path.clone());
        }
        let path = self.resolve(state)?;
        info!(boot_file = %path.display(), policy = %self.policy, "Selected boot file");
        state.file = BootFile::Resolved(path.clone());
        Ok(path)
    }

    fn resolve(&self, state: &mut BootState) -> ConfigFileResult<PathBuf> {
        let reset = state.reset;

        // a persisting reload boots from the main file, where updates were written
        if reset && !self.policy.is_read_only() && state.pending_name.is_none() {
            return Ok(self.main_file.to_path_buf());
        }

        let name = if let Some(name) = state.pending_name.take() {
            name
        } else if self.policy.is_read_only() && state.reuse_last {
            naming::LAST.to_string()
        } else {
            self.boot_file_name.to_string()
        };

        let boot_file = if name == self.layout.raw_file_name {
            self.main_file.to_path_buf()
        } else {
            NameResolver::new(self.layout, self.policy).find_boot_file(self.main_file, &name)?
        };
        debug!(name = %name, boot_file = %boot_file.display(), reset, "Resolving boot file");

        match fs::metadata(&boot_file) {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if reset || self.policy.require_existing() {
                    return Err(ConfigFileError::FileNotFound { path: boot_file });
                }
                create_boot_file(&boot_file)?;
            }
            Err(e) => return Err(ConfigFileError::io(&boot_file, e)),
            Ok(meta) if !reset && meta.len() > 0 => {
                if self.policy.reject_existing() {
                    return Err(ConfigFileError::NonEmptyFile { path: boot_file });
                }
                if self.policy.remove_existing() {
                    info!(path = %boot_file.display(), "Discarding existing configuration");
                    fs::remove_file(&boot_file).map_err(|source| ConfigFileError::CannotDelete {
                        path: boot_file.clone(),
                        source,
                    })?;
                    create_boot_file(&boot_file)?;
                }
            }
            Ok(_) => {}
        }
        Ok(boot_file)
    }
}

fn create_boot_file(path: &Path) -> ConfigFileResult<()> {
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map(|_| debug!(path = %path.display(), "Created empty boot file"))
        .map_err(|source| ConfigFileError::CannotCreate {
            path: path.to_path_buf(),
            source,
        })
}
