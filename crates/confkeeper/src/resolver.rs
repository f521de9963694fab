//! Determining which physical files an alias or file name refers to.
//!
//! Two questions are answered here:
//! - which file is the canonical *main* file (fixed for the life of the
//!   process, always named after the base configuration), and
//! - which file should be *booted from* (may be a history copy or snapshot).

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{ConfigFileError, ConfigFileResult};
use crate::layout::{ConfigLayout, canonical_path, file_name_of, list_names};
use crate::naming;
use crate::policy::InteractionPolicy;

/// Resolves aliases against a [`ConfigLayout`].
#[derive(Debug, Clone, Copy)]
pub struct NameResolver<'a> {
    layout: &'a ConfigLayout,
    policy: InteractionPolicy,
}

impl<'a> NameResolver<'a> {
    pub fn new(layout: &'a ConfigLayout, policy: InteractionPolicy) -> Self {
        Self { layout, policy }
    }

    /// Determine the canonical main file for an optional alias.
    ///
    /// Resolution order: raw name, history alias (`last`/`initial`/`boot`),
    /// version alias (`vN`), snapshot prefix, existing file in the
    /// configuration directory, absolute path (read-only only), and finally
    /// the name itself when the policy allows creating a new file.
    pub fn resolve_main_file(&self, name: Option<&str>) -> ConfigFileResult<PathBuf> {
        let file = self.determine_main_file(name)?;
        let canonical = canonical_path(&file)?;
        debug!(main_file = %canonical.display(), alias = ?name, "Resolved main configuration file");
        Ok(canonical)
    }

    fn determine_main_file(&self, name: Option<&str>) -> ConfigFileResult<PathBuf> {
        let layout = self.layout;
        let Some(name) = name else {
            return Ok(layout.configuration_dir.join(&layout.raw_file_name));
        };

        let mut main_name = if naming::is_history_alias(name) {
            Some(find_main_from_backup_suffix(&layout.history_root, name)?)
        } else if naming::is_version_alias(name) {
            Some(find_main_from_backup_suffix(&layout.current_history, name)?)
        } else {
            None
        };

        if main_name.is_none() {
            main_name = self.find_main_from_snapshot_prefix(name)?;
        }

        if main_name.is_none() {
            if self.in_configuration_dir(name).exists() {
                main_name = Some(naming::strip_prefix_suffix(name));
            } else if self.policy.is_read_only() {
                let absolute = Path::new(name);
                if absolute.is_absolute() && absolute.exists() {
                    return Ok(absolute.to_path_buf());
                }
            }
        }

        if main_name.is_none() && !self.policy.require_existing() {
            main_name = Some(naming::strip_prefix_suffix(name));
        }

        match main_name {
            Some(main_name) => Ok(self.in_configuration_dir(&main_name)),
            None => Err(ConfigFileError::MainFileNotFound {
                name: name.to_string(),
                dir: layout.configuration_dir.clone(),
            }),
        }
    }

    /// Search the snapshots directory for a single snapshot starting with
    /// `prefix` and recover the main file name from it.
    fn find_main_from_snapshot_prefix(&self, prefix: &str) -> ConfigFileResult<Option<String>> {
        let dir = &self.layout.snapshots_dir;
        let matches: Vec<String> = list_names(dir)
            .into_iter()
            .filter(|n| n.starts_with(prefix) && naming::is_snapshot_name(n))
            .collect();
        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(naming::strip_snapshot_prefix(single).map(str::to_string)),
            _ => Err(ConfigFileError::ambiguous(prefix, dir, matches)),
        }
    }

    /// Determine the file to boot from for `name`, given the resolved main file.
    ///
    /// Unlike [`resolve_main_file`](Self::resolve_main_file) the returned file
    /// may not exist; callers decide what a missing file means.
    pub fn find_boot_file(&self, main_file: &Path, name: &str) -> ConfigFileResult<PathBuf> {
        let layout = self.layout;
        let main_name = file_name_of(main_file);

        let file = if naming::is_history_alias(name) {
            layout.alias_file(&main_name, name)
        } else if naming::is_version_alias(name) {
            layout.version_alias_file(&main_name, name)
        } else if let Some(snapshot) = find_snapshot_with_prefix(&layout.snapshots_dir, name, false)? {
            snapshot
        } else {
            let absolute = Path::new(name);
            if self.policy.is_read_only() && absolute.is_absolute() && absolute.exists() {
                absolute.to_path_buf()
            } else {
                self.in_configuration_dir(name)
            }
        };
        canonical_path(&file)
    }

    /// `name` taken relative to the configuration directory, even when it is
    /// written as an absolute path.
    fn in_configuration_dir(&self, name: &str) -> PathBuf {
        let relative: PathBuf = Path::new(name)
            .components()
            .filter(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
            .collect();
        self.layout.configuration_dir.join(relative)
    }
}

/// Find the single file in `search_dir` ending in `.{backup_type}.xml` and
/// return the main file name it was derived from.
fn find_main_from_backup_suffix(search_dir: &Path, backup_type: &str) -> ConfigFileResult<String> {
    let suffix = naming::alias_suffix(backup_type);
    let matches: Vec<String> = list_names(search_dir)
        .into_iter()
        .filter(|n| n.ends_with(&suffix))
        .collect();

    match matches.as_slice() {
        [] => Err(ConfigFileError::BackupNotFound {
            suffix,
            dir: search_dir.to_path_buf(),
        }),
        [single] => naming::strip_alias_suffix(single, &suffix).ok_or_else(|| {
            ConfigFileError::NameNotAllowed {
                backup_type: backup_type.to_string(),
            }
        }),
        _ => Err(ConfigFileError::ambiguous(backup_type, search_dir, matches)),
    }
}

/// Find the single entry of `dir` whose name starts with `prefix`.
///
/// With `error_if_none` a missing match is an error, otherwise `None`.
/// More than one match is always an error.
pub fn find_snapshot_with_prefix(
    dir: &Path,
    prefix: &str,
    error_if_none: bool,
) -> ConfigFileResult<Option<PathBuf>> {
    let matches: Vec<String> = list_names(dir)
        .into_iter()
        .filter(|n| n.starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [] if error_if_none => Err(ConfigFileError::SnapshotNotFound {
            prefix: prefix.to_string(),
            dir: dir.to_path_buf(),
        }),
        [] => Ok(None),
        [single] => Ok(Some(dir.join(single))),
        _ => Err(ConfigFileError::ambiguous(prefix, dir, matches)),
    }
}
