//! Two-phase persistence of a configuration model to its file.
//!
//! [`FileConfigurationPersister::store`] marshals the model and stages it in a
//! temp file; the returned [`PersistenceResource`] then either commits (backup,
//! atomic promote, history refresh) or rolls back (temp file deleted).

use std::fs;
use std::sync::Arc;

use tracing::{debug, error};

use crate::codec::ConfigCodec;
use crate::error::{ConfigFileError, ConfigFileResult};
use crate::file::ConfigurationFile;
use crate::snapshot::SnapshotInfo;
use crate::writer::StagedFile;

/// Handle on one pending write. Exactly one of `commit` or `rollback` takes
/// effect; dropping an unfinished handle rolls it back.
pub trait PersistenceResource {
    fn commit(&mut self) -> ConfigFileResult<()>;

    fn rollback(&mut self);
}

/// Returned when nothing may be written yet.
#[derive(Debug, Default)]
pub struct NoopPersistenceResource;

impl PersistenceResource for NoopPersistenceResource {
    fn commit(&mut self) -> ConfigFileResult<()> {
        Ok(())
    }

    fn rollback(&mut self) {}
}

/// Staged write of a marshalled model to a [`ConfigurationFile`].
#[derive(Debug)]
pub struct FilePersistenceResource {
    file: Arc<ConfigurationFile>,
    staged: Option<StagedFile>,
}

impl FilePersistenceResource {
    /// Write `data` to a temp file beside the commit target.
    pub fn stage(file: Arc<ConfigurationFile>, data: &[u8]) -> ConfigFileResult<Self> {
        let staged = file.stage(data)?;
        debug!(temp = %staged.temp_path().display(), "Staged configuration");
        Ok(Self {
            file,
            staged: Some(staged),
        })
    }
}

impl PersistenceResource for FilePersistenceResource {
    /// Back up the current file, promote the staged one, refresh `last`.
    ///
    /// A failed backup does not stop the promote; its error is reported once
    /// the new configuration is in place.
    fn commit(&mut self) -> ConfigFileResult<()> {
        let staged = self
            .staged
            .take()
            .ok_or(ConfigFileError::RollbackAlreadyInvoked)?;

        let backup = self.file.backup();
        if let Err(e) = &backup {
            error!(error = %e, "Failed to back up configuration, committing anyway");
        }

        let promoted = self.file.commit_temp_file(&staged);
        staged.discard();
        promoted?;

        self.file.file_written()?;
        backup
    }

    fn rollback(&mut self) {
        if let Some(staged) = self.staged.take() {
            debug!(temp = %staged.temp_path().display(), "Rolling back staged configuration");
            staged.discard();
        }
    }
}

impl Drop for FilePersistenceResource {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// Loads and stores a model of type `C::Model` through a [`ConfigurationFile`].
pub struct FileConfigurationPersister<C> {
    file: Arc<ConfigurationFile>,
    codec: C,
}

impl<C: ConfigCodec> FileConfigurationPersister<C> {
    pub fn new(file: Arc<ConfigurationFile>, codec: C) -> Self {
        Self { file, codec }
    }

    pub fn configuration_file(&self) -> &Arc<ConfigurationFile> {
        &self.file
    }

    /// Parse the boot file into the operations that rebuild the model.
    pub fn load(&self) -> ConfigFileResult<Vec<C::Operation>> {
        let boot_file = self.file.boot_file()?;
        let data = fs::read(&boot_file).map_err(|e| ConfigFileError::io(&boot_file, e))?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        self.codec
            .parse(&data)
            .map_err(|e| ConfigFileError::Parse {
                path: boot_file,
                source: Box::new(e),
            })
    }

    /// Marshal `model` and stage it for writing.
    ///
    /// Before a successful boot nothing is written and a no-op handle is
    /// returned. A marshalling failure leaves every file untouched.
    pub fn store(&self, model: &C::Model) -> ConfigFileResult<Box<dyn PersistenceResource>> {
        if !self.file.is_boot_completed() {
            debug!("Boot not completed, skipping configuration store");
            return Ok(Box::new(NoopPersistenceResource));
        }
        let data = self
            .codec
            .marshal(model)
            .map_err(|e| ConfigFileError::Marshal(Box::new(e)))?;
        let resource = FilePersistenceResource::stage(Arc::clone(&self.file), &data)?;
        Ok(Box::new(resource))
    }

    pub fn successful_boot(&self) -> ConfigFileResult<()> {
        self.file.successful_boot()
    }

    pub fn snapshot(&self) -> ConfigFileResult<std::path::PathBuf> {
        self.file.snapshot()
    }

    pub fn list_snapshots(&self) -> SnapshotInfo {
        self.file.list_snapshots()
    }

    pub fn delete_snapshot(&self, prefix: &str) -> ConfigFileResult<()> {
        self.file.delete_snapshot(prefix)
    }
}
