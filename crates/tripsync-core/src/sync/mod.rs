//! Reconciliation of the local store with the remote document store.

mod backoff;
mod engine;
mod outcome;
mod resolve;
mod worker;

use thiserror::Error;

use crate::state::CyclePhase;

pub use backoff::next_delay;
pub use engine::{OutcomeListener, SyncEngine};
pub use outcome::{Rejection, SyncOutcome};
pub use resolve::resolve_conflict;
pub use worker::{NotificationTrigger, SyncWorker};

/// Failures that abort a sync cycle.
///
/// Remote failures are not errors: transient exhaustion, rejections and
/// conflicts are reported through [`SyncOutcome`].
#[derive(Error, Debug)]
pub enum SyncError {
    /// The local store failed; the next trigger retries the cycle
    #[error("Local store failure: {0}")]
    Storage(#[from] crate::Error),

    #[error("Invalid cycle transition from {from:?} to {to:?}")]
    Phase { from: CyclePhase, to: CyclePhase },
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
