//! Pending mutation model

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::entry::{EntryId, ScheduleEntry};
use crate::error::Error;

/// Kind of local edit waiting to be pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    /// Kind that results from a newer edit superseding `self`.
    ///
    /// A create that was never pushed stays a create when edited again; a
    /// delete always wins.
    #[must_use]
    pub const fn coalesce(self, newer: Self) -> Self {
        match (self, newer) {
            (_, Self::Delete) => Self::Delete,
            (Self::Create, _) => Self::Create,
            (_, newer) => newer,
        }
    }
}

impl FromStr for MutationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Database(format!("Unknown mutation kind: {other}"))),
        }
    }
}

/// A local edit not yet acknowledged by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
    /// Device-local sequence number, assigned on first enqueue
    pub seq: i64,
    /// Entry this mutation targets
    pub entry_id: EntryId,
    /// Operation kind
    pub kind: MutationKind,
    /// Full entry snapshot at mutation time
    pub snapshot: ScheduleEntry,
    /// Bumped each time a newer edit replaces the snapshot
    pub generation: i64,
    /// When the mutation was first queued (Unix ms)
    pub enqueued_at: i64,
    /// Push attempts so far
    pub attempts: u32,
}

impl PendingMutation {
    /// Build an unsequenced mutation; the store assigns `seq` on enqueue.
    #[must_use]
    pub fn new(kind: MutationKind, snapshot: ScheduleEntry) -> Self {
        Self {
            seq: 0,
            entry_id: snapshot.id.clone(),
            kind,
            snapshot,
            generation: 0,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
            attempts: 0,
        }
    }
}
