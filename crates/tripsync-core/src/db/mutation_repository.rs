//! Pending mutation queue

use super::with_transaction;
use crate::error::{Error, Result};
use crate::models::{EntryId, MutationKind, PendingMutation, ScheduleEntry};
use rusqlite::{params, Connection, OptionalExtension};

const MUTATION_COLUMNS: &str = "seq, entry_id, kind, snapshot, generation, enqueued_at, attempts";

/// Trait for the ordered, per-entry coalescing mutation queue
pub trait MutationRepository {
    /// Queue a mutation, superseding any queued mutation for the same entry.
    ///
    /// Returns the sequence number, which is the original one when an
    /// existing mutation was replaced.
    fn enqueue(&self, mutation: &PendingMutation) -> Result<i64>;

    /// All queued mutations in sequence order
    fn list(&self) -> Result<Vec<PendingMutation>>;

    /// The queued mutation for an entry, if any
    fn get_for_entry(&self, entry_id: &EntryId) -> Result<Option<PendingMutation>>;

    /// Remove a mutation unconditionally
    fn remove(&self, seq: i64) -> Result<bool>;

    /// Remove a mutation only if it was not superseded since it was read
    fn remove_if_generation(&self, seq: i64, generation: i64) -> Result<bool>;

    /// Record a push attempt
    fn mark_attempt(&self, seq: i64) -> Result<()>;

    /// Rewrite the revision the queued snapshot is based on
    fn rebase(&self, seq: i64, revision: i64) -> Result<()>;

    /// Number of queued mutations
    fn count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `MutationRepository`
pub struct SqliteMutationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMutationRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_mutation(row: &rusqlite::Row<'_>) -> rusqlite::Result<PendingMutation> {
        let entry_id: String = row.get(1)?;
        let kind: String = row.get(2)?;
        let snapshot: String = row.get(3)?;
        let conversion = |index: usize, error: Error| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        };

        Ok(PendingMutation {
            seq: row.get(0)?,
            entry_id: entry_id.parse().map_err(|error| conversion(1, error))?,
            kind: kind.parse().map_err(|error| conversion(2, error))?,
            snapshot: serde_json::from_str::<ScheduleEntry>(&snapshot)
                .map_err(|error| conversion(3, error.into()))?,
            generation: row.get(4)?,
            enqueued_at: row.get(5)?,
            attempts: row.get(6)?,
        })
    }
}

impl MutationRepository for SqliteMutationRepository<'_> {
    fn enqueue(&self, mutation: &PendingMutation) -> Result<i64> {
        mutation.snapshot.validate()?;
        let snapshot = serde_json::to_string(&mutation.snapshot)?;

        with_transaction(self.conn, || {
            let existing: Option<(i64, String)> = self
                .conn
                .query_row(
                    "SELECT seq, kind FROM pending_mutations WHERE entry_id = ?",
                    params![mutation.entry_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            if let Some((seq, existing_kind)) = existing {
                let kind = existing_kind
                    .parse::<MutationKind>()
                    .map_or(mutation.kind, |previous| previous.coalesce(mutation.kind));
                self.conn.execute(
                    "UPDATE pending_mutations
                     SET kind = ?, snapshot = ?, generation = generation + 1
                     WHERE seq = ?",
                    params![kind.as_str(), snapshot, seq],
                )?;
                tracing::debug!("Coalesced mutation for {} into seq {seq}", mutation.entry_id);
                return Ok(seq);
            }

            self.conn.execute(
                "INSERT INTO pending_mutations (entry_id, kind, snapshot, generation, enqueued_at, attempts)
                 VALUES (?, ?, ?, 0, ?, 0)",
                params![
                    mutation.entry_id.as_str(),
                    mutation.kind.as_str(),
                    snapshot,
                    mutation.enqueued_at
                ],
            )?;
            Ok(self.conn.last_insert_rowid())
        })
    }

    fn list(&self) -> Result<Vec<PendingMutation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MUTATION_COLUMNS} FROM pending_mutations ORDER BY seq ASC"
        ))?;

        let mut mutations = Vec::new();
        for row in stmt.query_map([], Self::parse_mutation)? {
            match row {
                Ok(mutation) => mutations.push(mutation),
                Err(error) => tracing::warn!("Skipping unreadable pending mutation: {error}"),
            }
        }
        Ok(mutations)
    }

    fn get_for_entry(&self, entry_id: &EntryId) -> Result<Option<PendingMutation>> {
        let mutation = self
            .conn
            .query_row(
                &format!("SELECT {MUTATION_COLUMNS} FROM pending_mutations WHERE entry_id = ?"),
                params![entry_id.as_str()],
                Self::parse_mutation,
            )
            .optional()?;
        Ok(mutation)
    }

    fn remove(&self, seq: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM pending_mutations WHERE seq = ?", params![seq])?;
        Ok(rows > 0)
    }

    fn remove_if_generation(&self, seq: i64, generation: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM pending_mutations WHERE seq = ? AND generation = ?",
            params![seq, generation],
        )?;
        Ok(rows > 0)
    }

    fn mark_attempt(&self, seq: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE pending_mutations SET attempts = attempts + 1 WHERE seq = ?",
            params![seq],
        )?;
        Ok(())
    }

    fn rebase(&self, seq: i64, revision: i64) -> Result<()> {
        with_transaction(self.conn, || {
            let snapshot: String = self
                .conn
                .query_row(
                    "SELECT snapshot FROM pending_mutations WHERE seq = ?",
                    params![seq],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("pending mutation {seq}")))?;

            let mut entry: ScheduleEntry = serde_json::from_str(&snapshot)?;
            entry.revision = revision;
            self.conn.execute(
                "UPDATE pending_mutations SET snapshot = ? WHERE seq = ?",
                params![serde_json::to_string(&entry)?, seq],
            )?;
            Ok(())
        })
    }

    fn count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
