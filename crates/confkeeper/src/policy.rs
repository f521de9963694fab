//! Interaction policies: how an existing (or missing) configuration file is
//! treated at boot and whether updates are persisted to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rule set governing the main configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionPolicy {
    /// The file must exist and is updated on every change (default).
    #[default]
    Standard,
    /// An existing non-empty file is deleted and recreated empty.
    Discard,
    /// Boot fails if a non-empty file exists; otherwise an empty one is created.
    New,
    /// The file must exist and is never written. Updates land in the history
    /// `last` file only.
    ReadOnly,
}

impl InteractionPolicy {
    pub fn require_existing(self) -> bool {
        matches!(self, Self::Standard | Self::ReadOnly)
    }

    pub fn reject_existing(self) -> bool {
        matches!(self, Self::New)
    }

    pub fn remove_existing(self) -> bool {
        matches!(self, Self::Discard)
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Self::ReadOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Discard => "discard",
            Self::New => "new",
            Self::ReadOnly => "read_only",
        }
    }
}

impl fmt::Display for InteractionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown interaction policy '{0}' (expected standard, discard, new or read_only)")]
pub struct ParsePolicyError(String);

impl FromStr for InteractionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "standard" => Ok(Self::Standard),
            "discard" => Ok(Self::Discard),
            "new" => Ok(Self::New),
            "read_only" | "readonly" => Ok(Self::ReadOnly),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}
