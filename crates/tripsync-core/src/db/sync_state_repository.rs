//! Singleton sync bookkeeping (cursor, last successful sync)

use crate::error::Result;
use crate::models::SyncCursor;
use rusqlite::{params, Connection, OptionalExtension};

const CURSOR_KEY: &str = "cursor";
const LAST_SYNCED_AT_KEY: &str = "last_synced_at";

/// Trait for sync bookkeeping records
pub trait SyncStateRepository {
    /// Load the persisted change-stream cursor
    fn load_cursor(&self) -> Result<Option<SyncCursor>>;

    /// Persist the change-stream cursor
    fn save_cursor(&self, cursor: &SyncCursor) -> Result<()>;

    /// Forget the cursor so the next fetch starts from the beginning
    fn clear_cursor(&self) -> Result<bool>;

    /// Time of the last fully merged fetch (Unix ms)
    fn last_synced_at(&self) -> Result<Option<i64>>;

    /// Record the time of a fully merged fetch
    fn set_last_synced_at(&self, timestamp_ms: i64) -> Result<()>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?, ?)",
            params![key, value],
        )?;
        Ok(())
    }
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn load_cursor(&self) -> Result<Option<SyncCursor>> {
        Ok(self.get_value(CURSOR_KEY)?.map(SyncCursor::new))
    }

    fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        self.set_value(CURSOR_KEY, cursor.as_str())
    }

    fn clear_cursor(&self) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM sync_state WHERE key = ?", params![CURSOR_KEY])?;
        Ok(removed > 0)
    }

    fn last_synced_at(&self) -> Result<Option<i64>> {
        Ok(self
            .get_value(LAST_SYNCED_AT_KEY)?
            .and_then(|value| value.parse().ok()))
    }

    fn set_last_synced_at(&self, timestamp_ms: i64) -> Result<()> {
        self.set_value(LAST_SYNCED_AT_KEY, &timestamp_ms.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_cursor_absent_on_fresh_database() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        assert_eq!(repo.load_cursor().unwrap(), None);
        assert_eq!(repo.last_synced_at().unwrap(), None);
    }

    #[test]
    fn test_save_and_load_cursor_overwrites() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.save_cursor(&SyncCursor::new("c1")).unwrap();
        repo.save_cursor(&SyncCursor::new("c2")).unwrap();
        repo.set_last_synced_at(1_700_000_000_000).unwrap();

        assert_eq!(repo.load_cursor().unwrap(), Some(SyncCursor::new("c2")));
        assert_eq!(repo.last_synced_at().unwrap(), Some(1_700_000_000_000));
    }

    #[test]
    fn test_clear_cursor_keeps_last_synced_at() {
        let db = Database::open_in_memory().unwrap();
        let repo = SqliteSyncStateRepository::new(db.connection());

        repo.save_cursor(&SyncCursor::new("c1")).unwrap();
        repo.set_last_synced_at(42).unwrap();

        assert!(repo.clear_cursor().unwrap());
        assert!(!repo.clear_cursor().unwrap());
        assert_eq!(repo.load_cursor().unwrap(), None);
        assert_eq!(repo.last_synced_at().unwrap(), Some(42));
    }
}
