//! Data models for tripsync

mod cursor;
mod entry;
mod mutation;
mod sync_conflict;

pub use cursor::SyncCursor;
pub use entry::{EntryId, ScheduleEntry, TransportKind};
pub use mutation::{MutationKind, PendingMutation};
pub use sync_conflict::{ConflictWinner, SyncConflict};
