//! Sync conflict model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::Error;

/// Which side survived a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for ConflictWinner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::Database(format!("Unknown conflict winner: {other}"))),
        }
    }
}

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entry involved in the conflict
    pub entry_id: String,
    /// Local snapshot's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Remote document's timestamp
    pub incoming_updated_at: i64,
    /// Revision the local edit was based on
    pub local_revision: i64,
    /// Revision held by the remote store
    pub incoming_revision: i64,
    /// Surviving side
    pub winner: ConflictWinner,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
}
