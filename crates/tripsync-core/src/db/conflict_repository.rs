//! Conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{ConflictWinner, SyncConflict};
use rusqlite::{params, Connection};

/// A conflict resolution about to be logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict<'a> {
    pub entry_id: &'a str,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub local_revision: i64,
    pub incoming_revision: i64,
    pub winner: ConflictWinner,
    pub strategy: &'a str,
}

/// Trait for the resolved-conflict log
pub trait ConflictRepository {
    /// Append a resolution, returning its row id
    fn record(&self, conflict: &NewConflict<'_>, resolved_at: i64) -> Result<i64>;

    /// Most recent resolutions first
    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

/// `SQLite` implementation of `ConflictRepository`
pub struct SqliteConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteConflictRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl ConflictRepository for SqliteConflictRepository<'_> {
    fn record(&self, conflict: &NewConflict<'_>, resolved_at: i64) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO sync_conflicts (
                entry_id,
                local_updated_at,
                incoming_updated_at,
                local_revision,
                incoming_revision,
                winner,
                resolved_at,
                strategy
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                conflict.entry_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at,
                conflict.local_revision,
                conflict.incoming_revision,
                conflict.winner.as_str(),
                resolved_at,
                conflict.strategy
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entry_id, local_updated_at, incoming_updated_at, local_revision,
                    incoming_revision, winner, resolved_at, strategy
             FROM sync_conflicts
             ORDER BY resolved_at DESC, id DESC
             LIMIT ?",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    SyncConflict {
                        id: row.get(0)?,
                        entry_id: row.get(1)?,
                        local_updated_at: row.get(2)?,
                        incoming_updated_at: row.get(3)?,
                        local_revision: row.get(4)?,
                        incoming_revision: row.get(5)?,
                        winner: ConflictWinner::Remote,
                        resolved_at: row.get(7)?,
                        strategy: row.get(8)?,
                    },
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(mut conflict, winner)| -> Result<SyncConflict> {
                conflict.winner = winner.parse()?;
                Ok(conflict)
            })
            .collect()
    }
}
