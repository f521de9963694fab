//! Crash-safe file updates: stage to `{target}.tmp`, then atomically rename.
//!
//! The temp file is created with the target's permission bits (and, on Linux,
//! its POSIX ACL) so the promoted file keeps the attributes the operator set.
//! A target is never written in place; an interrupted commit leaves at most an
//! orphaned temp file behind.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::{ConfigFileError, ConfigFileResult};

const TEMP_SUFFIX: &str = ".tmp";

/// Temp files whose deletion failed, retried by [`delete_scheduled_files`].
static PENDING_DELETES: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

// ============================================================================
// Staging
// ============================================================================

/// Content written to a temp file, waiting to be promoted over `target`.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
}

impl StagedFile {
    /// Write `data` to the temp file for `target`.
    ///
    /// The temp file lives next to `target`, or in `fallback_dir` if the
    /// target's directory is not writable. Fails with `PermissionDenied` if
    /// `target` exists but cannot be written.
    pub fn stage(data: &[u8], target: &Path, fallback_dir: &Path) -> ConfigFileResult<Self> {
        Self::stage_with(data, target, fallback_dir, is_writable)
    }

    /// [`stage`](Self::stage) with the writability check supplied by the caller.
    pub(crate) fn stage_with(
        data: &[u8],
        target: &Path,
        fallback_dir: &Path,
        writable: impl Fn(&Path) -> bool,
    ) -> ConfigFileResult<Self> {
        if target.exists() && !writable(target) {
            return Err(ConfigFileError::PermissionDenied {
                path: target.to_path_buf(),
            });
        }

        let temp = temp_path_for(target, fallback_dir, writable(&parent_dir(target)));
        match fs::remove_file(&temp) {
            Ok(()) => debug!(path = %temp.display(), "Removed stale temp file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigFileError::io(&temp, e)),
        }

        let staged = Self {
            temp,
            target: target.to_path_buf(),
        };
        if let Err(e) = staged.write(data) {
            remove_temp_file(&staged.temp);
            return Err(e);
        }
        Ok(staged)
    }

    fn write(&self, data: &[u8]) -> ConfigFileResult<()> {
        let mut file = create_with_attributes(&self.temp, &self.target)
            .map_err(|e| ConfigFileError::io(&self.temp, e))?;
        file.write_all(data)
            .map_err(|e| ConfigFileError::io(&self.temp, e))?;
        file.sync_all()
            .map_err(|e| ConfigFileError::io(&self.temp, e))?;
        Ok(())
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically rename the temp file over the target.
    ///
    /// The temp file is removed afterwards whatever the outcome.
    pub fn promote(&self) -> ConfigFileResult<()> {
        let result = promote(&self.temp, &self.target);
        remove_temp_file(&self.temp);
        result
    }

    /// Drop the staged content without touching the target.
    pub fn discard(&self) {
        remove_temp_file(&self.temp);
    }
}

/// `{target}.tmp`, placed in the target's directory when `parent_writable`,
/// otherwise in `fallback_dir`.
pub fn temp_path_for(target: &Path, fallback_dir: &Path, parent_writable: bool) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let temp_name = format!("{file_name}{TEMP_SUFFIX}");
    if parent_writable {
        target.with_file_name(temp_name)
    } else {
        fallback_dir.join(temp_name)
    }
}

/// Rename `temp` over `target`, replacing it.
pub fn promote(temp: &Path, target: &Path) -> ConfigFileResult<()> {
    fs::rename(temp, target).map_err(|source| ConfigFileError::CommitFailed {
        temp: temp.to_path_buf(),
        target: target.to_path_buf(),
        source,
    })
}

// ============================================================================
// Attributes
// ============================================================================

/// Create `path` exclusively, carrying over the attributes of `template` when
/// it exists. Attribute copying is best effort.
fn create_with_attributes(path: &Path, template: &Path) -> std::io::Result<fs::File> {
    let file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;

    if let Ok(meta) = fs::metadata(template) {
        // set_permissions bypasses the umask that OpenOptions would apply
        if let Err(e) = fs::set_permissions(path, meta.permissions()) {
            debug!(path = %path.display(), error = %e, "Could not copy permissions to temp file");
        }
        copy_acl(template, path);
    }
    Ok(file)
}

#[cfg(target_os = "linux")]
fn copy_acl(from: &Path, to: &Path) {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let name = c"system.posix_acl_access";
    let (Ok(src), Ok(dst)) = (
        CString::new(from.as_os_str().as_bytes()),
        CString::new(to.as_os_str().as_bytes()),
    ) else {
        return;
    };

    // SAFETY: both paths and the attribute name are valid NUL-terminated
    // strings that outlive the calls; a null buffer with size 0 only queries
    // the attribute length.
    let size = unsafe { libc::getxattr(src.as_ptr(), name.as_ptr(), std::ptr::null_mut(), 0) };
    if size <= 0 {
        // no ACL, or xattrs unsupported on this filesystem
        return;
    }

    let mut buf = vec![0u8; size as usize];
    // SAFETY: buf is writable for buf.len() bytes.
    let read = unsafe {
        libc::getxattr(
            src.as_ptr(),
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if read <= 0 {
        return;
    }

    // SAFETY: buf holds `read` initialised bytes.
    let rc = unsafe {
        libc::setxattr(
            dst.as_ptr(),
            name.as_ptr(),
            buf.as_ptr().cast(),
            read as usize,
            0,
        )
    };
    if rc != 0 {
        debug!(
            path = %to.display(),
            error = %std::io::Error::last_os_error(),
            "Could not copy ACL to temp file"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn copy_acl(_from: &Path, _to: &Path) {}

// ============================================================================
// Permission checks
// ============================================================================

/// Whether the current process may write to `path`.
#[cfg(unix)]
pub fn is_writable(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
pub fn is_writable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

/// Whether new files can be created next to `path`.
pub fn is_parent_writable(path: &Path) -> bool {
    is_writable(&parent_dir(path))
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

// ============================================================================
// Copy / delete helpers
// ============================================================================

/// Copy `from` over `to`, replacing any existing file.
pub fn copy_file(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to).map(|_| ())
}

/// Move `from` to `to`, replacing any existing file.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

/// Delete a temp file, never failing. A failed deletion is logged and the
/// path queued for [`delete_scheduled_files`].
pub fn remove_temp_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to delete temp file, deferring to exit");
            schedule_delete(path);
        }
    }
}

fn schedule_delete(path: &Path) {
    if let Ok(mut pending) = PENDING_DELETES.lock() {
        pending.push(path.to_path_buf());
    }
}

/// Retry deletions that failed earlier. Called by the binary before exiting.
/// Returns the number of files still left behind.
pub fn delete_scheduled_files() -> usize {
    let pending = match PENDING_DELETES.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(_) => return 0,
    };
    let mut remaining = 0;
    for path in pending {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Temp file could not be deleted");
                remaining += 1;
            }
        }
    }
    remaining
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn temp_path_sits_next_to_target() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        assert_eq!(
            temp_path_for(&target, Path::new("/unused"), true),
            tmp.path().join("standalone.xml.tmp")
        );
    }

    #[test]
    fn temp_path_falls_back_when_parent_read_only() {
        let target = Path::new("/srv/locked/standalone.xml");
        assert_eq!(
            temp_path_for(target, Path::new("/srv/cfg"), false),
            PathBuf::from("/srv/cfg/standalone.xml.tmp")
        );
    }

    #[test]
    fn stage_rejects_non_writable_target() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        std::fs::write(&target, "old").unwrap();

        let err = StagedFile::stage_with(b"new", &target, tmp.path(), |p| p != target.as_path())
            .unwrap_err();
        assert!(matches!(err, ConfigFileError::PermissionDenied { ref path } if *path == target));
        assert!(!tmp.path().join("standalone.xml.tmp").exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn stage_uses_fallback_dir_when_parent_not_writable() {
        let tmp = TempDir::new().unwrap();
        let locked = tmp.path().join("locked");
        let fallback = tmp.path().join("cfg");
        std::fs::create_dir(&locked).unwrap();
        std::fs::create_dir(&fallback).unwrap();
        let target = locked.join("standalone.xml");
        std::fs::write(&target, "old").unwrap();

        let staged =
            StagedFile::stage_with(b"new", &target, &fallback, |p| p != locked.as_path()).unwrap();
        assert_eq!(staged.temp_path(), fallback.join("standalone.xml.tmp"));

        staged.promote().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert!(!fallback.join("standalone.xml.tmp").exists());
    }

    #[test]
    fn stage_and_promote_replaces_target() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        std::fs::write(&target, "old").unwrap();

        let staged = StagedFile::stage(b"new", &target, tmp.path()).unwrap();
        assert_eq!(std::fs::read_to_string(staged.temp_path()).unwrap(), "new");
        // target untouched until promotion
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");

        staged.promote().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
        assert!(!staged.temp_path().exists());
    }

    #[test]
    fn stage_creates_missing_target_on_promote() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("fresh.xml");

        let staged = StagedFile::stage(b"content", &target, tmp.path()).unwrap();
        staged.promote().unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "content");
    }

    #[test]
    fn stage_replaces_stale_temp_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        std::fs::write(tmp.path().join("standalone.xml.tmp"), "orphan").unwrap();

        let staged = StagedFile::stage(b"fresh", &target, tmp.path()).unwrap();
        assert_eq!(std::fs::read_to_string(staged.temp_path()).unwrap(), "fresh");
    }

    #[test]
    fn discard_leaves_target_alone() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        std::fs::write(&target, "old").unwrap();

        let staged = StagedFile::stage(b"new", &target, tmp.path()).unwrap();
        staged.discard();

        assert!(!staged.temp_path().exists());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "old");
    }

    #[test]
    fn failed_promote_names_target_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        // a non-empty directory cannot be replaced by a file
        let target = tmp.path().join("standalone.xml");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("child"), "x").unwrap();
        let temp = tmp.path().join("standalone.xml.tmp");
        std::fs::write(&temp, "new").unwrap();

        let staged = StagedFile {
            temp: temp.clone(),
            target: target.clone(),
        };
        let err = staged.promote().unwrap_err();
        assert!(matches!(err, ConfigFileError::CommitFailed { .. }));
        assert!(err.to_string().contains("standalone.xml"));
        assert!(!temp.exists());
    }

    #[cfg(unix)]
    #[test]
    fn staged_file_keeps_target_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("standalone.xml");
        std::fs::write(&target, "old").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o640)).unwrap();

        let staged = StagedFile::stage(b"new", &target, tmp.path()).unwrap();
        let mode = std::fs::metadata(staged.temp_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o640);

        staged.promote().unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o640);
    }

    #[test]
    fn move_file_replaces_destination() {
        let tmp = TempDir::new().unwrap();
        let from = tmp.path().join("a");
        let to = tmp.path().join("b");
        std::fs::write(&from, "a").unwrap();
        std::fs::write(&to, "b").unwrap();

        move_file(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "a");
    }

    #[test]
    fn failed_temp_delete_is_retried_at_exit() {
        let tmp = TempDir::new().unwrap();
        // unlinking a directory fails, so the path is queued
        let stuck = tmp.path().join("standalone.xml.tmp");
        std::fs::create_dir(&stuck).unwrap();
        remove_temp_file(&stuck);
        assert!(stuck.exists());
        assert!(PENDING_DELETES.lock().unwrap().contains(&stuck));

        // once deletable, the retry removes it; missing entries are ignored
        std::fs::remove_dir(&stuck).unwrap();
        std::fs::write(&stuck, "orphan").unwrap();
        schedule_delete(&tmp.path().join("never-existed.tmp"));
        delete_scheduled_files();
        assert!(!stuck.exists());
    }
}
