use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::policy::InteractionPolicy;

/// Environment variable overriding the number of versioned files kept.
pub const CURRENT_HISTORY_LENGTH_ENV: &str = "CONFKEEPER_CURRENT_HISTORY_LENGTH";
/// Environment variable overriding how many days old history directories are kept.
pub const HISTORY_DAYS_ENV: &str = "CONFKEEPER_HISTORY_DAYS";

pub const DEFAULT_CURRENT_HISTORY_LENGTH: u32 = 100;
pub const DEFAULT_HISTORY_DAYS: u32 = 30;

// ============================================================================
// Settings (root)
// ============================================================================

/// Settings for the `confkeeper` binary, loaded from a YAML file.
#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default = "default_configuration_dir")]
    pub configuration_dir: PathBuf,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Alias or file name to boot from instead of `file_name`.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub policy: InteractionPolicy,
    #[serde(default)]
    pub history: HistorySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            configuration_dir: default_configuration_dir(),
            file_name: default_file_name(),
            name: None,
            policy: InteractionPolicy::default(),
            history: HistorySettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

fn default_configuration_dir() -> PathBuf {
    PathBuf::from("configuration")
}

fn default_file_name() -> String {
    "standalone.xml".to_string()
}

// ============================================================================
// HistorySettings
// ============================================================================

/// Retention limits for the configuration history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HistorySettings {
    /// Number of versioned files kept in the `current` history directory.
    #[serde(default = "default_current_history_length")]
    pub current_history_length: u32,
    /// Timestamped history directories older than this many days are removed.
    #[serde(default = "default_history_days")]
    pub history_days: u32,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            current_history_length: default_current_history_length(),
            history_days: default_history_days(),
        }
    }
}

impl HistorySettings {
    /// Compiled-in defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `CONFKEEPER_CURRENT_HISTORY_LENGTH` and `CONFKEEPER_HISTORY_DAYS`
    /// on top of `self`. Invalid values leave the current setting untouched.
    pub fn with_env_overrides(self) -> Self {
        Self {
            current_history_length: parse_setting(
                CURRENT_HISTORY_LENGTH_ENV,
                std::env::var(CURRENT_HISTORY_LENGTH_ENV).ok().as_deref(),
                self.current_history_length,
            ),
            history_days: parse_setting(
                HISTORY_DAYS_ENV,
                std::env::var(HISTORY_DAYS_ENV).ok().as_deref(),
                self.history_days,
            ),
        }
    }
}

/// Parse a non-negative integer knob, falling back to `default` when the value
/// is absent, unparsable, or negative.
pub fn parse_setting(name: &str, raw: Option<&str>, default: u32) -> u32 {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().parse::<i64>() {
        Ok(value) if value >= 0 => u32::try_from(value).unwrap_or(u32::MAX),
        Ok(value) => {
            warn!(setting = name, value, fallback = default, "Negative value ignored, using default");
            default
        }
        Err(e) => {
            warn!(setting = name, value = raw, error = %e, fallback = default, "Invalid value ignored, using default");
            default
        }
    }
}

fn default_current_history_length() -> u32 {
    DEFAULT_CURRENT_HISTORY_LENGTH
}

fn default_history_days() -> u32 {
    DEFAULT_HISTORY_DAYS
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse settings file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
