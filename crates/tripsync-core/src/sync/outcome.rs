//! Result of a sync request.

use serde::Serialize;

use crate::models::EntryId;

/// A mutation the remote refused; it has been dropped from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub entry_id: EntryId,
    pub reason: String,
}

/// Statistics of one `request_sync` call, summed over every cycle it ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    /// Mutations acknowledged by the remote
    pub pushed: usize,
    /// Push conflicts resolved automatically
    pub conflicts: usize,
    /// Remote changes applied locally
    pub merged: usize,
    /// Remote documents dropped because they failed validation
    pub skipped: usize,
    pub rejected: Vec<Rejection>,
    /// Gateway calls that exhausted their retries
    pub transient_failures: usize,
    /// Cycles executed; 0 when the request was coalesced
    pub cycles: usize,
    pub cancelled: bool,
    /// The request joined a cycle that was already running
    pub coalesced: bool,
    /// Why the remote refused the last fetch, if it did
    pub fetch_rejected: Option<String>,
    /// Set once consecutive transient cycles pass the configured ceiling
    pub degraded: Option<String>,
    /// Tombstones removed after the cycle
    pub purged: usize,
}

impl SyncOutcome {
    pub(crate) fn coalesced() -> Self {
        Self {
            coalesced: true,
            ..Self::default()
        }
    }

    pub(crate) fn absorb(&mut self, cycle: Self) {
        self.pushed += cycle.pushed;
        self.conflicts += cycle.conflicts;
        self.merged += cycle.merged;
        self.skipped += cycle.skipped;
        self.rejected.extend(cycle.rejected);
        self.transient_failures += cycle.transient_failures;
        self.cycles += cycle.cycles;
        self.cancelled |= cycle.cancelled;
        self.purged += cycle.purged;
        if cycle.fetch_rejected.is_some() {
            self.fetch_rejected = cycle.fetch_rejected;
        }
        if cycle.degraded.is_some() {
            self.degraded = cycle.degraded;
        }
    }

    /// Whether the remote was unreachable at some point.
    pub const fn hit_transient_failure(&self) -> bool {
        self.transient_failures > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn absorb_sums_cycles() {
        let mut total = SyncOutcome::default();
        total.absorb(SyncOutcome {
            pushed: 2,
            cycles: 1,
            ..SyncOutcome::default()
        });
        total.absorb(SyncOutcome {
            merged: 3,
            cycles: 1,
            rejected: vec![Rejection {
                entry_id: "e1".parse().unwrap(),
                reason: "bad".to_string(),
            }],
            degraded: Some("offline".to_string()),
            ..SyncOutcome::default()
        });
        total.absorb(SyncOutcome {
            cycles: 1,
            fetch_rejected: Some("cursor expired".to_string()),
            ..SyncOutcome::default()
        });

        assert_eq!(total.pushed, 2);
        assert_eq!(total.merged, 3);
        assert_eq!(total.cycles, 3);
        assert_eq!(total.rejected.len(), 1);
        assert_eq!(total.degraded.as_deref(), Some("offline"));
        assert_eq!(total.fetch_rejected.as_deref(), Some("cursor expired"));
        assert!(!total.coalesced);
    }
}
