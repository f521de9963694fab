//! Confkeeper - lifecycle management for a server's persistent configuration file.
//!
//! Picks the file to boot from, writes updates atomically, and keeps a
//! versioned history plus on-demand snapshots next to the main file.

// ============================================================================
// Naming and layout
// ============================================================================

pub mod config;
pub mod error;
pub mod layout;
pub mod naming;
pub mod policy;

// ============================================================================
// Lifecycle
// ============================================================================

pub mod boot;
pub mod file;
pub mod history;
pub mod resolver;
pub mod snapshot;
pub mod writer;

// ============================================================================
// Persistence
// ============================================================================

pub mod codec;
pub mod persistence;

pub use codec::{ConfigCodec, YamlCodec};
pub use config::{HistorySettings, Settings};
pub use error::{ConfigFileError, ConfigFileResult};
pub use file::ConfigurationFile;
pub use persistence::{
    FileConfigurationPersister, FilePersistenceResource, NoopPersistenceResource,
    PersistenceResource,
};
pub use policy::InteractionPolicy;
pub use snapshot::SnapshotInfo;
pub use writer::delete_scheduled_files;
