//! Configuration history: `initial`/`boot`/`last` copies, numbered versions
//! in `current/`, and retention of both.
//!
//! Layout under `{config_dir}/{name}_history/`:
//! - `{stem}.initial.xml` written once, on the very first successful boot
//! - `{stem}.boot.xml` / `{stem}.last.xml` refreshed on every boot
//! - `current/{stem}.vN.xml` one per commit since this boot
//! - `{yyyyMMdd-HHmmssSSS}/` the `current/` of earlier boots
//! - `snapshot/` on-demand snapshots

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local};
use tracing::{debug, info, warn};

use crate::config::HistorySettings;
use crate::error::{ConfigFileError, ConfigFileResult};
use crate::layout::{ConfigLayout, list_names};
use crate::naming;
use crate::writer::{copy_file, move_file};

/// Offset applied to the backup directory timestamp when the first choice is
/// already taken (coarse clocks can produce the same name twice).
const RENAME_RETRY_OFFSET_MS: i64 = 100;

/// History operations for one main file.
pub struct HistoryManager<'a> {
    pub layout: &'a ConfigLayout,
    /// File name of the main file; history names are derived from it.
    pub main_file_name: &'a str,
    pub settings: HistorySettings,
}

impl HistoryManager<'_> {
    pub fn last_file(&self) -> PathBuf {
        self.layout.alias_file(self.main_file_name, naming::LAST)
    }

    pub fn boot_file(&self) -> PathBuf {
        self.layout.alias_file(self.main_file_name, naming::BOOT)
    }

    pub fn initial_file(&self) -> PathBuf {
        self.layout.alias_file(self.main_file_name, naming::INITIAL)
    }

    pub fn versioned_file(&self, n: u64) -> PathBuf {
        self.layout.versioned_file(self.main_file_name, n)
    }

    /// Seed the history after a successful boot.
    ///
    /// `boot_file` is copied to `source` first when they differ, so the
    /// durable location holds what was booted. The history directories are
    /// then (re)created and the alias copies refreshed from `source`.
    pub fn seed(&self, boot_file: &Path, source: &Path, now: DateTime<Local>) -> ConfigFileResult<()> {
        let history_err = |e: std::io::Error| ConfigFileError::History {
            path: boot_file.to_path_buf(),
            source: e,
        };

        if boot_file != source {
            copy_file(boot_file, source).map_err(history_err)?;
        }

        self.create_history_directory(now)?;

        let initial = self.initial_file();
        if !initial.exists() {
            copy_file(source, &initial).map_err(history_err)?;
        }
        copy_file(source, &self.last_file()).map_err(history_err)?;
        copy_file(source, &self.boot_file()).map_err(history_err)?;

        info!(history = %self.layout.history_root.display(), "Configuration history initialised");
        Ok(())
    }

    /// Create the history root and snapshot directories, archive a non-empty
    /// `current/` under a timestamp, prune expired archives, and leave an
    /// empty `current/` behind.
    pub fn create_history_directory(&self, now: DateTime<Local>) -> ConfigFileResult<()> {
        let layout = self.layout;
        create_dir(&layout.history_root)?;
        create_dir(&layout.snapshots_dir)?;

        let current = &layout.current_history;
        if current.exists() {
            if !current.is_dir() {
                return Err(ConfigFileError::NotADirectory {
                    path: current.clone(),
                });
            }

            let has_entries = fs::read_dir(current)
                .map_err(|e| ConfigFileError::io(current, e))?
                .next()
                .is_some();
            if has_entries {
                self.archive_current(now)?;
            }

            self.prune_history_directories(now);
        }

        create_dir(current)
    }

    fn archive_current(&self, now: DateTime<Local>) -> ConfigFileResult<()> {
        let current = &self.layout.current_history;
        let mut target = self.layout.history_root.join(naming::timestamp(&now));
        if target.exists() {
            let retry = now + Duration::milliseconds(RENAME_RETRY_OFFSET_MS);
            debug!(
                existing = %target.display(),
                "History backup directory already exists, retrying with adjusted timestamp"
            );
            target = self.layout.history_root.join(naming::timestamp(&retry));
        }

        fs::rename(current, &target).map_err(|source| ConfigFileError::CannotRename {
            from: current.clone(),
            to: target.clone(),
            source,
        })?;
        debug!(archive = %target.display(), "Archived previous history");
        Ok(())
    }

    /// Remove archived history directories older than `history_days`.
    ///
    /// Archive names are fixed-width timestamps, so comparing names compares
    /// dates.
    fn prune_history_directories(&self, now: DateTime<Local>) {
        let cutoff = naming::timestamp(&(now - Duration::days(i64::from(self.settings.history_days))));
        for name in list_names(&self.layout.history_root) {
            if name.len() == cutoff.len() && naming::is_timestamp(&name) && name < cutoff {
                let dir = self.layout.history_root.join(&name);
                match fs::remove_dir_all(&dir) {
                    Ok(()) => debug!(dir = %dir.display(), "Removed expired history"),
                    Err(e) => warn!(dir = %dir.display(), error = %e, "Failed to remove expired history"),
                }
            }
        }
    }

    /// Move `source` into `current/` as version `n`.
    pub fn rotate(&self, source: &Path, n: u64) -> std::io::Result<PathBuf> {
        let versioned = self.versioned_file(n);
        move_file(source, &versioned)?;
        debug!(version = n, path = %versioned.display(), "Rotated configuration into history");
        Ok(versioned)
    }

    /// Delete versions that fell out of the retention window after version
    /// `sequence` was written.
    ///
    /// Walks down from `sequence - current_history_length` and stops at the
    /// first version that no longer exists, so files below a gap left by an
    /// external deletion are not collected.
    pub fn prune_versions(&self, sequence: u64) {
        let limit = u64::from(self.settings.current_history_length);
        if sequence <= limit {
            return;
        }
        for k in (1..=sequence - limit).rev() {
            let file = self.versioned_file(k);
            match fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "Failed to delete old version");
                }
            }
        }
    }
}

fn create_dir(path: &Path) -> ConfigFileResult<()> {
    fs::create_dir_all(path).map_err(|source| ConfigFileError::CannotCreate {
        path: path.to_path_buf(),
        source,
    })
}
