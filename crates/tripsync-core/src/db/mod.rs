//! Database layer for tripsync

mod connection;
mod conflict_repository;
mod entry_repository;
mod migrations;
mod mutation_repository;
mod sync_state_repository;

pub use connection::Database;
pub use conflict_repository::{ConflictRepository, NewConflict, SqliteConflictRepository};
pub use entry_repository::{EntryRepository, SqliteEntryRepository};
pub use mutation_repository::{MutationRepository, SqliteMutationRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};

use crate::error::Result;
use rusqlite::Connection;

/// Run `f` inside a transaction unless the caller already opened one.
///
/// Repository methods that must be atomic use this so the store can compose
/// them into a larger transaction.
pub(crate) fn with_transaction<T>(conn: &Connection, f: impl FnOnce() -> Result<T>) -> Result<T> {
    if !conn.is_autocommit() {
        return f();
    }

    let tx = conn.unchecked_transaction()?;
    let value = f()?;
    tx.commit()?;
    Ok(value)
}
