//! The configuration file aggregate: one per server instance.
//!
//! Ties together main-file resolution, boot-file selection, history and
//! snapshots. Configuration changes are expected to be serialized by the
//! caller; the only internal locking covers boot-file resolution and the
//! one-shot boot latch.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Local;
use tracing::{debug, error, info};

use crate::boot::{BootFileSelector, BootState};
use crate::config::HistorySettings;
use crate::error::{ConfigFileError, ConfigFileResult};
use crate::history::HistoryManager;
use crate::layout::{ConfigLayout, file_name_of};
use crate::policy::InteractionPolicy;
use crate::resolver::NameResolver;
use crate::snapshot::{SnapshotInfo, SnapshotStore};
use crate::writer::{StagedFile, copy_file, is_parent_writable, remove_temp_file};

/// Suffix of the transient copy a read-only configuration seeds its history from.
const READ_ONLY_BOOT_SUFFIX: &str = ".boot";

pub struct ConfigurationFile {
    layout: ConfigLayout,
    /// Name given at construction, or the raw name.
    boot_file_name: String,
    main_file: PathBuf,
    main_file_name: String,
    last_file: PathBuf,
    policy: InteractionPolicy,
    settings: HistorySettings,
    sequence: AtomicU64,
    done_bootup: AtomicBool,
    boot: Mutex<BootState>,
}

impl ConfigurationFile {
    /// Resolve the main file for `raw_name` (optionally via the alias `name`)
    /// in `configuration_dir`, with history limits taken from the environment.
    pub fn new(
        configuration_dir: impl AsRef<Path>,
        raw_name: &str,
        name: Option<&str>,
        policy: InteractionPolicy,
    ) -> ConfigFileResult<Self> {
        Self::with_settings(
            configuration_dir,
            raw_name,
            name,
            policy,
            HistorySettings::from_env(),
        )
    }

    pub fn with_settings(
        configuration_dir: impl AsRef<Path>,
        raw_name: &str,
        name: Option<&str>,
        policy: InteractionPolicy,
        settings: HistorySettings,
    ) -> ConfigFileResult<Self> {
        let configuration_dir = configuration_dir.as_ref();
        if !configuration_dir.is_dir() {
            return Err(ConfigFileError::DirectoryNotFound {
                path: configuration_dir.to_path_buf(),
            });
        }
        if raw_name.is_empty() {
            return Err(ConfigFileError::MainFileNotFound {
                name: raw_name.to_string(),
                dir: configuration_dir.to_path_buf(),
            });
        }

        let layout = ConfigLayout::new(configuration_dir, raw_name);
        let main_file = NameResolver::new(&layout, policy).resolve_main_file(name)?;
        let main_file_name = file_name_of(&main_file);
        let last_file = HistoryManager {
            layout: &layout,
            main_file_name: &main_file_name,
            settings,
        }
        .last_file();

        info!(
            main_file = %main_file.display(),
            policy = %policy,
            "Configuration file resolved"
        );

        Ok(Self {
            boot_file_name: name.unwrap_or(raw_name).to_string(),
            layout,
            main_file,
            main_file_name,
            last_file,
            policy,
            settings,
            sequence: AtomicU64::new(0),
            done_bootup: AtomicBool::new(false),
            boot: Mutex::new(BootState::new()),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn configuration_dir(&self) -> &Path {
        &self.layout.configuration_dir
    }

    pub fn raw_file_name(&self) -> &str {
        &self.layout.raw_file_name
    }

    /// The canonical main file. Never changes after construction.
    pub fn main_file(&self) -> &Path {
        &self.main_file
    }

    /// The history copy of the most recent configuration.
    pub fn last_file(&self) -> &Path {
        &self.last_file
    }

    pub fn history_root(&self) -> &Path {
        &self.layout.history_root
    }

    pub fn current_history(&self) -> &Path {
        &self.layout.current_history
    }

    pub fn snapshots_dir(&self) -> &Path {
        &self.layout.snapshots_dir
    }

    pub fn interaction_policy(&self) -> InteractionPolicy {
        self.policy
    }

    pub fn history_settings(&self) -> HistorySettings {
        self.settings
    }

    /// Number of the most recent versioned file.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn is_boot_completed(&self) -> bool {
        self.done_bootup.load(Ordering::SeqCst)
    }

    /// Where commits land: the main file, or `last` for read-only configurations.
    pub fn commit_target(&self) -> &Path {
        if self.policy.is_read_only() {
            &self.last_file
        } else {
            &self.main_file
        }
    }

    // ------------------------------------------------------------------
    // Boot
    // ------------------------------------------------------------------

    fn lock_boot(&self) -> MutexGuard<'_, BootState> {
        // BootState stays consistent even if a holder panicked mid-resolution
        self.boot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn selector(&self) -> BootFileSelector<'_> {
        BootFileSelector {
            layout: &self.layout,
            policy: self.policy,
            main_file: &self.main_file,
            boot_file_name: &self.boot_file_name,
        }
    }

    fn history(&self) -> HistoryManager<'_> {
        HistoryManager {
            layout: &self.layout,
            main_file_name: &self.main_file_name,
            settings: self.settings,
        }
    }

    /// The file to parse for this boot, resolved once per boot cycle.
    ///
    /// Depending on the policy this may create, empty, or reject the file.
    pub fn boot_file(&self) -> ConfigFileResult<PathBuf> {
        let mut state = self.lock_boot();
        self.selector().select(&mut state)
    }

    /// Force the boot file to be resolved again on the next access (reload).
    ///
    /// `reuse_last` makes a read-only configuration reload from the history
    /// `last` file; `new_boot_file_name` boots from a different file. The boot
    /// latch is cleared so the reloaded configuration seeds history again.
    pub fn reset_boot_file(&self, reuse_last: bool, new_boot_file_name: Option<&str>) {
        let mut state = self.lock_boot();
        state.reset(reuse_last, new_boot_file_name);
        self.done_bootup.store(false, Ordering::SeqCst);
        debug!(reuse_last, new_boot_file_name = ?new_boot_file_name, "Boot file reset");
    }

    /// Whether a reload to `name` would find an existing boot file.
    pub fn check_can_find_new_boot_file(&self, name: &str) -> bool {
        NameResolver::new(&self.layout, self.policy)
            .find_boot_file(&self.main_file, name)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Record that the boot file was parsed successfully and seed the history.
    ///
    /// Only the first call per boot cycle has any effect.
    pub fn successful_boot(&self) -> ConfigFileResult<()> {
        let mut state = self.lock_boot();
        if self.done_bootup.load(Ordering::SeqCst) {
            return Ok(());
        }
        let boot_file = self.selector().select(&mut state)?;

        let source = if self.policy.is_read_only() {
            let sidecar = self.read_only_boot_copy();
            remove_temp_file(&sidecar);
            sidecar
        } else {
            self.main_file.clone()
        };

        let result = self.history().seed(&boot_file, &source, Local::now());
        if self.policy.is_read_only() {
            remove_temp_file(&source);
        }
        result?;

        self.done_bootup.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `{main}.boot`, next to the main file when that directory is writable.
    fn read_only_boot_copy(&self) -> PathBuf {
        let name = format!("{}{READ_ONLY_BOOT_SUFFIX}", self.main_file_name);
        if is_parent_writable(&self.main_file) {
            self.main_file.with_file_name(name)
        } else {
            self.layout.configuration_dir.join(name)
        }
    }

    // ------------------------------------------------------------------
    // Commit cycle
    // ------------------------------------------------------------------

    /// Write `data` to a temp file beside the commit target.
    pub fn stage(&self, data: &[u8]) -> ConfigFileResult<StagedFile> {
        StagedFile::stage(data, self.commit_target(), &self.layout.configuration_dir)
    }

    /// Move the current configuration into the versioned history and apply
    /// the retention window. No-op before a successful boot.
    pub fn backup(&self) -> ConfigFileResult<()> {
        if !self.is_boot_completed() {
            return Ok(());
        }
        let source = self.commit_target();
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let history = self.history();
        history
            .rotate(source, n)
            .map_err(|source| ConfigFileError::Backup {
                path: self.main_file.clone(),
                source,
            })?;
        history.prune_versions(n);
        Ok(())
    }

    /// Promote a staged file over the commit target. No-op before a
    /// successful boot.
    pub fn commit_temp_file(&self, staged: &StagedFile) -> ConfigFileResult<()> {
        if !self.is_boot_completed() {
            return Ok(());
        }
        staged.promote()
    }

    /// Refresh the history `last` file after a commit. No-op before a
    /// successful boot and for read-only configurations, whose commits
    /// already land in `last`.
    pub fn file_written(&self) -> ConfigFileResult<()> {
        if !self.is_boot_completed() || self.policy.is_read_only() {
            return Ok(());
        }
        copy_file(&self.main_file, &self.last_file).map_err(|source| {
            error!(path = %self.last_file.display(), error = %source, "Failed to refresh last configuration");
            ConfigFileError::Backup {
                path: self.main_file.clone(),
                source,
            }
        })
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    fn snapshots(&self) -> SnapshotStore<'_> {
        SnapshotStore::new(&self.layout.snapshots_dir)
    }

    /// Copy the current configuration into a new timestamped snapshot.
    ///
    /// Fails before a successful boot, when no history may exist yet.
    pub fn snapshot(&self) -> ConfigFileResult<PathBuf> {
        if !self.is_boot_completed() {
            return Err(ConfigFileError::BootNotCompleted {
                path: self.main_file.clone(),
            });
        }
        let source = if self.policy.is_read_only() {
            &self.last_file
        } else {
            &self.main_file
        };
        self.snapshots()
            .take(source, &self.main_file_name, Local::now())
    }

    pub fn list_snapshots(&self) -> SnapshotInfo {
        self.snapshots().list()
    }

    /// Delete the snapshot uniquely identified by `prefix`, or all of them
    /// for `all`.
    pub fn delete_snapshot(&self, prefix: &str) -> ConfigFileResult<()> {
        self.snapshots().delete(prefix)
    }
}

impl std::fmt::Debug for ConfigurationFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationFile")
            .field("main_file", &self.main_file)
            .field("policy", &self.policy)
            .field("sequence", &self.sequence())
            .field("boot_completed", &self.is_boot_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn settings(current_history_length: u32) -> HistorySettings {
        HistorySettings {
            current_history_length,
            history_days: 30,
        }
    }

    fn open(dir: &Path, name: Option<&str>, policy: InteractionPolicy) -> ConfigurationFile {
        ConfigurationFile::with_settings(dir, "standalone.xml", name, policy, settings(100)).unwrap()
    }

    fn commit(file: &ConfigurationFile, content: &str) {
        let staged = file.stage(content.as_bytes()).unwrap();
        file.backup().unwrap();
        file.commit_temp_file(&staged).unwrap();
        file.file_written().unwrap();
    }

    #[test]
    fn missing_directory_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let err = ConfigurationFile::new(
            tmp.path().join("missing"),
            "standalone.xml",
            None,
            InteractionPolicy::Standard,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::DirectoryNotFound { .. }));
    }

    #[test]
    fn empty_raw_name_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let err = ConfigurationFile::with_settings(
            tmp.path(),
            "",
            None,
            InteractionPolicy::New,
            settings(100),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigFileError::MainFileNotFound { .. }));
    }

    #[test]
    fn snapshot_before_boot_creates_no_history() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<server/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);

        let err = file.snapshot().unwrap_err();
        assert!(matches!(err, ConfigFileError::BootNotCompleted { .. }));
        assert!(!file.history_root().exists());

        file.successful_boot().unwrap();
        assert!(file.snapshot().unwrap().exists());
    }

    #[test]
    fn boot_from_file_outside_configuration_dir() {
        let tmp = TempDir::new().unwrap();
        let cfg = tmp.path().join("cfg");
        let other = tmp.path().join("other");
        fs::create_dir_all(&cfg).unwrap();
        fs::create_dir_all(&other).unwrap();
        fs::write(other.join("x.xml"), "<other/>").unwrap();

        let file = open(&cfg, Some("../other/x.xml"), InteractionPolicy::Standard);
        let external = other.canonicalize().unwrap().join("x.xml");
        assert_eq!(file.main_file(), external);
        assert_eq!(file.boot_file().unwrap(), external);

        file.successful_boot().unwrap();
        assert!(!cfg.join("x.xml").exists());
        assert_eq!(fs::read_to_string(file.last_file()).unwrap(), "<other/>");
    }

    #[test]
    fn derived_paths() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().canonicalize().unwrap();
        let file = open(&dir, None, InteractionPolicy::Standard);

        assert_eq!(file.main_file(), dir.join("standalone.xml"));
        assert_eq!(file.history_root(), dir.join("standalone_xml_history"));
        assert_eq!(
            file.last_file(),
            dir.join("standalone_xml_history/standalone.last.xml")
        );
        assert_eq!(file.commit_target(), file.main_file());
    }

    #[test]
    fn successful_boot_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<server/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);

        file.successful_boot().unwrap();
        let archived_before = fs::read_dir(file.history_root()).unwrap().count();
        commit(&file, "<v1/>");

        // a second call must not rotate current/ away or touch the aliases
        file.successful_boot().unwrap();
        assert_eq!(
            fs::read_dir(file.history_root()).unwrap().count(),
            archived_before
        );
        assert!(file.current_history().join("standalone.v1.xml").exists());
        assert_eq!(fs::read_to_string(file.last_file()).unwrap(), "<v1/>");
    }

    #[test]
    fn history_calls_are_noops_before_boot() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<server/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);

        let staged = file.stage(b"<new/>").unwrap();
        file.backup().unwrap();
        file.commit_temp_file(&staged).unwrap();
        file.file_written().unwrap();
        staged.discard();

        assert_eq!(file.sequence(), 0);
        assert!(!file.history_root().exists());
        assert_eq!(
            fs::read_to_string(file.main_file()).unwrap(),
            "<server/>"
        );
    }

    #[test]
    fn commit_rotates_and_refreshes_last() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<v0/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);
        file.successful_boot().unwrap();

        commit(&file, "<v1/>");
        commit(&file, "<v2/>");

        assert_eq!(file.sequence(), 2);
        assert_eq!(fs::read_to_string(file.main_file()).unwrap(), "<v2/>");
        assert_eq!(fs::read_to_string(file.last_file()).unwrap(), "<v2/>");
        assert_eq!(
            fs::read_to_string(file.current_history().join("standalone.v1.xml")).unwrap(),
            "<v0/>"
        );
        assert_eq!(
            fs::read_to_string(file.current_history().join("standalone.v2.xml")).unwrap(),
            "<v1/>"
        );
    }

    #[test]
    fn read_only_never_writes_main_file() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join("standalone.xml");
        fs::write(&main, "<v0/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::ReadOnly);
        file.successful_boot().unwrap();

        // the transient boot copy is gone
        assert!(!tmp.path().join("standalone.xml.boot").exists());
        assert_eq!(file.commit_target(), file.last_file());

        commit(&file, "<v1/>");

        assert_eq!(fs::read_to_string(&main).unwrap(), "<v0/>");
        assert_eq!(fs::read_to_string(file.last_file()).unwrap(), "<v1/>");
        assert_eq!(
            fs::read_to_string(file.current_history().join("standalone.v1.xml")).unwrap(),
            "<v0/>"
        );
    }

    #[test]
    fn booting_from_alias_restores_main_file() {
        let tmp = TempDir::new().unwrap();
        let main = tmp.path().join("standalone.xml");
        fs::write(&main, "<v0/>").unwrap();
        {
            let file = open(tmp.path(), None, InteractionPolicy::Standard);
            file.successful_boot().unwrap();
            commit(&file, "<v1/>");
        }

        // boot from the initial copy: it becomes the main file again
        let file = open(tmp.path(), Some("initial"), InteractionPolicy::Standard);
        let boot = file.boot_file().unwrap();
        assert!(boot.ends_with("standalone.initial.xml"));
        file.successful_boot().unwrap();
        assert_eq!(fs::read_to_string(file.main_file()).unwrap(), "<v0/>");
    }

    #[test]
    fn reload_clears_latch_and_keeps_sequence() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<v0/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);
        file.successful_boot().unwrap();
        commit(&file, "<v1/>");

        file.reset_boot_file(false, None);
        assert!(!file.is_boot_completed());
        assert_eq!(file.boot_file().unwrap(), file.main_file());

        file.successful_boot().unwrap();
        commit(&file, "<v2/>");
        assert_eq!(file.sequence(), 2);
        // v1 was archived with the previous current/
        assert!(!file.current_history().join("standalone.v1.xml").exists());
        assert!(file.current_history().join("standalone.v2.xml").exists());
    }

    #[test]
    fn check_can_find_new_boot_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<v0/>").unwrap();
        fs::write(tmp.path().join("other.xml"), "<other/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::Standard);

        assert!(file.check_can_find_new_boot_file("other.xml"));
        assert!(!file.check_can_find_new_boot_file("missing.xml"));
        assert!(!file.check_can_find_new_boot_file("last"));
    }

    #[test]
    fn read_only_snapshot_uses_last_after_boot() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("standalone.xml"), "<v0/>").unwrap();
        let file = open(tmp.path(), None, InteractionPolicy::ReadOnly);
        file.successful_boot().unwrap();
        commit(&file, "<v1/>");

        let snapshot = file.snapshot().unwrap();
        assert_eq!(fs::read_to_string(snapshot).unwrap(), "<v1/>");
    }
}
