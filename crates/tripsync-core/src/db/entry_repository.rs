//! Schedule entry repository implementation

use super::with_transaction;
use crate::error::{Error, Result};
use crate::models::{EntryId, ScheduleEntry, TransportKind};
use rusqlite::{params, Connection, OptionalExtension};

const ENTRY_COLUMNS: &str =
    "id, owner_id, title, location, starts_at, ends_at, transport, revision, updated_at, is_deleted";

/// Trait for schedule entry storage operations
pub trait EntryRepository {
    /// Get an entry by ID, including tombstones
    fn get(&self, id: &EntryId) -> Result<Option<ScheduleEntry>>;

    /// List an owner's live entries ordered by departure.
    ///
    /// Rows that fail to decode are skipped and logged.
    fn list(&self, owner_id: &str) -> Result<Vec<ScheduleEntry>>;

    /// Insert or replace an entry
    fn upsert(&self, entry: &ScheduleEntry) -> Result<()>;

    /// Mark an entry deleted, returning the tombstone
    fn soft_delete(&self, id: &EntryId, now_ms: i64) -> Result<ScheduleEntry>;

    /// Apply a remote version when the local copy is absent or older.
    ///
    /// Returns whether the row changed.
    fn apply_if_newer(&self, entry: &ScheduleEntry) -> Result<bool>;

    /// Raise the stored revision without touching content
    fn raise_revision(&self, id: &EntryId, revision: i64) -> Result<bool>;

    /// Remove tombstones last modified before `cutoff_ms` that no pending
    /// mutation still references.
    fn purge_deleted(&self, cutoff_ms: i64) -> Result<usize>;

    /// Entry IDs starting with `prefix`, most recently modified first
    fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<EntryId>>;
}

/// `SQLite` implementation of `EntryRepository`
pub struct SqliteEntryRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteEntryRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Parse an entry from a database row
    fn parse_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduleEntry> {
        let conversion = |index: usize, error: Error| {
            rusqlite::Error::FromSqlConversionFailure(
                index,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        };

        let id: String = row.get(0)?;
        let transport = row
            .get::<_, Option<String>>(6)?
            .map(|value| value.parse::<TransportKind>())
            .transpose()
            .map_err(|error| conversion(6, error))?;

        Ok(ScheduleEntry {
            id: id.parse().map_err(|error| conversion(0, error))?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            location: row.get(3)?,
            starts_at: row.get(4)?,
            ends_at: row.get(5)?,
            transport,
            revision: row.get(7)?,
            updated_at: row.get(8)?,
            is_deleted: row.get::<_, i32>(9)? != 0,
        })
    }

    fn write(&self, entry: &ScheduleEntry) -> Result<()> {
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO schedule_entries ({ENTRY_COLUMNS})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ),
            params![
                entry.id.as_str(),
                entry.owner_id,
                entry.title,
                entry.location,
                entry.starts_at,
                entry.ends_at,
                entry.transport.map(TransportKind::as_str),
                entry.revision,
                entry.updated_at,
                i32::from(entry.is_deleted)
            ],
        )?;
        Ok(())
    }
}

impl EntryRepository for SqliteEntryRepository<'_> {
    fn get(&self, id: &EntryId) -> Result<Option<ScheduleEntry>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM schedule_entries WHERE id = ?"),
                params![id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list(&self, owner_id: &str) -> Result<Vec<ScheduleEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS}
             FROM schedule_entries
             WHERE owner_id = ? AND is_deleted = 0
             ORDER BY starts_at ASC, id ASC"
        ))?;

        let mut entries = Vec::new();
        for row in stmt.query_map(params![owner_id], Self::parse_entry)? {
            match row {
                Ok(entry) => entries.push(entry),
                Err(error) => {
                    tracing::warn!("Skipping unreadable schedule entry for {owner_id}: {error}");
                }
            }
        }

        Ok(entries)
    }

    fn upsert(&self, entry: &ScheduleEntry) -> Result<()> {
        entry.validate()?;
        self.write(entry)
    }

    fn soft_delete(&self, id: &EntryId, now_ms: i64) -> Result<ScheduleEntry> {
        let rows = self.conn.execute(
            "UPDATE schedule_entries SET is_deleted = 1, updated_at = ? WHERE id = ?",
            params![now_ms, id.as_str()],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        self.get(id)?.ok_or_else(|| Error::NotFound(id.to_string()))
    }

    fn apply_if_newer(&self, entry: &ScheduleEntry) -> Result<bool> {
        entry.validate()?;

        with_transaction(self.conn, || {
            let local_revision: Option<i64> = self
                .conn
                .query_row(
                    "SELECT revision FROM schedule_entries WHERE id = ?",
                    params![entry.id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;

            if local_revision.is_some_and(|revision| revision >= entry.revision) {
                return Ok(false);
            }

            self.write(entry)?;
            Ok(true)
        })
    }

    fn raise_revision(&self, id: &EntryId, revision: i64) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE schedule_entries SET revision = ? WHERE id = ? AND revision < ?",
            params![revision, id.as_str(), revision],
        )?;
        Ok(rows > 0)
    }

    fn purge_deleted(&self, cutoff_ms: i64) -> Result<usize> {
        let rows = self.conn.execute(
            "DELETE FROM schedule_entries
             WHERE is_deleted = 1
               AND updated_at < ?
               AND id NOT IN (SELECT entry_id FROM pending_mutations)",
            params![cutoff_ms],
        )?;
        Ok(rows)
    }

    fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<EntryId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM schedule_entries
             WHERE is_deleted = 0 AND id LIKE ? ESCAPE '\\'
             ORDER BY updated_at DESC
             LIMIT ?",
        )?;

        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let ids = stmt
            .query_map(params![format!("{escaped}%"), limit], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ids.iter().map(|id| id.parse()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use pretty_assertions::assert_eq;

    fn setup() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn entry(owner: &str, title: &str, starts_at: i64) -> ScheduleEntry {
        ScheduleEntry::new(owner, title, "Kamalapur", starts_at, starts_at + 60_000).unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let trip = entry("alice", "Dhaka to Sylhet", 1_000).with_transport(TransportKind::Train);
        repo.upsert(&trip).unwrap();

        let fetched = repo.get(&trip.id).unwrap().unwrap();
        assert_eq!(fetched, trip);
    }

    #[test]
    fn test_list_filters_owner_and_orders_by_start() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        repo.upsert(&entry("alice", "later", 5_000)).unwrap();
        repo.upsert(&entry("alice", "sooner", 1_000)).unwrap();
        repo.upsert(&entry("bob", "not mine", 2_000)).unwrap();

        let titles = repo
            .list("alice")
            .unwrap()
            .into_iter()
            .map(|entry| entry.title)
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["sooner", "later"]);
    }

    #[test]
    fn test_list_skips_corrupt_rows() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        repo.upsert(&entry("alice", "fine", 1_000)).unwrap();
        db.connection()
            .execute(
                "INSERT INTO schedule_entries (id, owner_id, title, starts_at, ends_at, updated_at)
                 VALUES ('broken', 'alice', 'bad row', 'garbage', 0, 0)",
                [],
            )
            .unwrap();
        db.connection()
            .execute(
                "INSERT INTO schedule_entries (id, owner_id, title, starts_at, ends_at, transport, updated_at)
                 VALUES ('ferry', 'alice', 'bad transport', 0, 0, 'ferry', 0)",
                [],
            )
            .unwrap();

        let entries = repo.list("alice").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "fine");
    }

    #[test]
    fn test_soft_delete_hides_from_list() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let trip = entry("alice", "cancelled", 1_000);
        repo.upsert(&trip).unwrap();
        let tombstone = repo.soft_delete(&trip.id, trip.updated_at + 10).unwrap();

        assert!(tombstone.is_deleted);
        assert!(repo.list("alice").unwrap().is_empty());
        assert!(repo.get(&trip.id).unwrap().unwrap().is_deleted);
    }

    #[test]
    fn test_soft_delete_missing_entry() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let result = repo.soft_delete(&EntryId::new(), 0);
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_apply_if_newer_compares_revisions() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let mut trip = entry("alice", "v1", 1_000);
        trip.revision = 2;
        assert!(repo.apply_if_newer(&trip).unwrap());

        let mut stale = trip.clone();
        stale.title = "stale".to_string();
        stale.revision = 1;
        assert!(!repo.apply_if_newer(&stale).unwrap());

        let mut duplicate = trip.clone();
        duplicate.title = "duplicate".to_string();
        assert!(!repo.apply_if_newer(&duplicate).unwrap());

        let mut newer = trip.clone();
        newer.title = "v3".to_string();
        newer.revision = 3;
        assert!(repo.apply_if_newer(&newer).unwrap());

        assert_eq!(repo.get(&trip.id).unwrap().unwrap().title, "v3");
    }

    #[test]
    fn test_raise_revision_only_moves_forward() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let mut trip = entry("alice", "content", 1_000);
        trip.revision = 4;
        repo.upsert(&trip).unwrap();

        assert!(!repo.raise_revision(&trip.id, 3).unwrap());
        assert!(repo.raise_revision(&trip.id, 5).unwrap());

        let stored = repo.get(&trip.id).unwrap().unwrap();
        assert_eq!(stored.revision, 5);
        assert_eq!(stored.title, "content");
    }

    #[test]
    fn test_purge_deleted_respects_cutoff() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let old = entry("alice", "old", 1_000);
        let recent = entry("alice", "recent", 2_000);
        repo.upsert(&old.tombstone(100)).unwrap();
        repo.upsert(&recent.tombstone(10_000)).unwrap();

        assert_eq!(repo.purge_deleted(5_000).unwrap(), 1);
        assert!(repo.get(&old.id).unwrap().is_none());
        assert!(repo.get(&recent.id).unwrap().is_some());
    }

    #[test]
    fn test_list_ids_by_prefix() {
        let db = setup();
        let repo = SqliteEntryRepository::new(db.connection());

        let mut first = entry("alice", "one", 1_000);
        first.id = "abc-1".parse().unwrap();
        let mut second = entry("alice", "two", 2_000);
        second.id = "abc-2".parse().unwrap();
        let mut other = entry("alice", "three", 3_000);
        other.id = "xyz".parse().unwrap();
        for trip in [&first, &second, &other] {
            repo.upsert(trip).unwrap();
        }

        assert_eq!(repo.list_ids_by_prefix("abc", 10).unwrap().len(), 2);
        assert_eq!(repo.list_ids_by_prefix("xy", 10).unwrap().len(), 1);
        assert!(repo.list_ids_by_prefix("%", 10).unwrap().is_empty());
    }
}
