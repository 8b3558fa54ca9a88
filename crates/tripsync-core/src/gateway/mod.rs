//! Remote document store abstraction.
//!
//! The sync engine only talks to the authoritative store through
//! [`RemoteGateway`]. [`MemoryGateway`] is an in-process store used by tests
//! and demos; [`HttpGateway`] speaks the JSON document API.

mod http;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EntryId, ScheduleEntry, SyncCursor};

pub use http::{HttpGateway, HttpGatewayConfig};
pub use memory::MemoryGateway;

/// Result type of gateway calls
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Failures reported by the remote store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The remote holds a newer revision than the one submitted
    #[error("Remote holds a newer revision ({})", .0.revision)]
    Conflict(Box<ScheduleEntry>),

    /// Network or availability failure; worth retrying
    #[error("Remote unavailable: {0}")]
    Transient(String),

    /// The remote refused the document; retrying unchanged will not help
    #[error("Remote rejected the document: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// One document from the remote change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub entry: ScheduleEntry,
}

/// A page of the remote change stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Changes in service order
    pub changes: Vec<RemoteChange>,
    /// Position after the last change of this batch
    pub cursor: SyncCursor,
    /// Documents dropped at the boundary because they failed validation
    pub skipped: usize,
}

/// Informational payload of a wake-up; the receiver always re-fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WakeHint {
    pub entry_ids: Vec<EntryId>,
}

/// Callback invoked when the remote signals new changes.
pub type ChangeHandler = Arc<dyn Fn(WakeHint) + Send + Sync>;

/// Access to the authoritative document store.
#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Changes after `cursor`, or the full stream when `cursor` is `None`.
    async fn fetch_since(&self, cursor: Option<&SyncCursor>) -> RemoteResult<ChangeBatch>;

    /// Persist a create, update or tombstone. Returns the stored document
    /// with the revision the remote assigned.
    async fn push(&self, entry: &ScheduleEntry) -> RemoteResult<ScheduleEntry>;

    /// Register a handler for change signals. Delivery is at-least-once.
    fn subscribe(&self, handler: ChangeHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(RemoteError::Transient("timeout".to_string()).is_transient());
        assert!(!RemoteError::Rejected("bad".to_string()).is_transient());
    }

    #[test]
    fn conflict_message_names_remote_revision() {
        let mut entry = ScheduleEntry::new("alice", "trip", "", 0, 0).unwrap();
        entry.revision = 4;
        let error = RemoteError::Conflict(Box::new(entry));
        assert_eq!(error.to_string(), "Remote holds a newer revision (4)");
    }
}
