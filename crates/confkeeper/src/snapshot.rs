//! On-demand snapshots of the configuration, independent of the version history.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ConfigFileError, ConfigFileResult};
use crate::layout::list_names;
use crate::naming;
use crate::resolver::find_snapshot_with_prefix;

/// Snapshot directory and the snapshot files it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotInfo {
    pub snapshot_directory: PathBuf,
    /// Snapshot file names, oldest first.
    pub names: Vec<String>,
}

/// Snapshots stored as `{dir}/{yyyyMMdd-HHmmssSSS}{main file name}`.
pub struct SnapshotStore<'a> {
    dir: &'a Path,
}

impl<'a> SnapshotStore<'a> {
    pub fn new(dir: &'a Path) -> Self {
        Self { dir }
    }

    /// Copy `source` into a new snapshot named after `main_file_name`.
    pub fn take(
        &self,
        source: &Path,
        main_file_name: &str,
        now: DateTime<Local>,
    ) -> ConfigFileResult<PathBuf> {
        let snapshot = self
            .dir
            .join(format!("{}{}", naming::timestamp(&now), main_file_name));
        let snapshot_err = |e: std::io::Error| ConfigFileError::Snapshot {
            from: source.to_path_buf(),
            to: snapshot.clone(),
            source: e,
        };

        fs::create_dir_all(self.dir).map_err(snapshot_err)?;
        fs::copy(source, &snapshot).map_err(snapshot_err)?;
        info!(snapshot = %snapshot.display(), "Took configuration snapshot");
        Ok(snapshot)
    }

    pub fn list(&self) -> SnapshotInfo {
        SnapshotInfo {
            snapshot_directory: self.dir.to_path_buf(),
            names: list_names(self.dir)
                .into_iter()
                .filter(|n| naming::is_snapshot_name(n))
                .collect(),
        }
    }

    /// Delete the single snapshot starting with `prefix`, or every entry of the
    /// snapshot directory when `prefix` is `all`.
    pub fn delete(&self, prefix: &str) -> ConfigFileResult<()> {
        if prefix == naming::ALL {
            self.delete_all();
            return Ok(());
        }

        let Some(snapshot) = find_snapshot_with_prefix(self.dir, prefix, true)? else {
            return Ok(());
        };
        fs::remove_file(&snapshot).map_err(|source| ConfigFileError::CannotDelete {
            path: snapshot.clone(),
            source,
        })?;
        info!(snapshot = %snapshot.display(), "Deleted configuration snapshot");
        Ok(())
    }

    fn delete_all(&self) {
        for name in list_names(self.dir) {
            let path = self.dir.join(&name);
            match fs::remove_file(&path) {
                Ok(()) => debug!(snapshot = %path.display(), "Deleted configuration snapshot"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete snapshot entry"),
            }
        }
    }
}
