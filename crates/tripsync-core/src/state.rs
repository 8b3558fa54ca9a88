//! Shared cross-platform state types.

use serde::Serialize;

/// Unified sync state shown by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Transient failures passed the configured ceiling; edits stay queued.
    Offline,
    Syncing,
    Synced,
    /// The last cycle aborted on a storage failure or the remote refused
    /// to serve changes.
    Error,
}

/// Phase of a single sync cycle.
///
/// ```text
/// Idle -> Draining -> Fetching -> Merging -> Idle
/// Idle -> Fetching (nothing to drain)
/// any  -> Idle     (cancelled, transient stop or storage failure)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Draining,
    Fetching,
    Merging,
}

impl CyclePhase {
    /// Whether the state machine allows moving from `self` to `next`.
    pub const fn can_transition(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Draining | Self::Fetching)
                | (Self::Draining, Self::Fetching)
                | (Self::Fetching, Self::Merging)
                | (Self::Draining | Self::Fetching | Self::Merging, Self::Idle)
        )
    }
}
