use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type ConnectionId = u32;
pub type SessionCode = String;

/// A single stroke as the client serialized it. Never interpreted here.
pub type PathRecord = serde_json::Value;

/// Copy of a whole `paths` sequence, captured for undo/redo.
pub type PathSnapshot = Vec<PathRecord>;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 5400;

/// How `update_paths` carries its payload. A deployment speaks exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathsProtocol {
    #[serde(rename = "full")]
    FullReplace,
    #[serde(rename = "patch")]
    TextPatch,
}

impl Default for PathsProtocol {
    fn default() -> Self {
        Self::FullReplace
    }
}

impl FromStr for PathsProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::FullReplace),
            "patch" => Ok(Self::TextPatch),
            other => Err(format!("unknown paths protocol '{}'", other)),
        }
    }
}

impl fmt::Display for PathsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullReplace => f.write_str("full"),
            Self::TextPatch => f.write_str("patch"),
        }
    }
}
