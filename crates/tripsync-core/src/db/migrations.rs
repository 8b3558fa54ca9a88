//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations
pub fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate(conn, 1, V1)?;
    }
    if version < 2 {
        migrate(conn, 2, V2)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;

    Ok(version)
}

/// Version 1: entries, pending mutations and sync state
const V1: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS schedule_entries (
        id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        title TEXT NOT NULL,
        location TEXT NOT NULL DEFAULT '',
        starts_at INTEGER NOT NULL,
        ends_at INTEGER NOT NULL,
        transport TEXT,
        revision INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL,
        is_deleted INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_entries_owner_start ON schedule_entries(owner_id, starts_at);
    CREATE INDEX IF NOT EXISTS idx_entries_deleted ON schedule_entries(is_deleted, updated_at);
    CREATE TABLE IF NOT EXISTS pending_mutations (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        snapshot TEXT NOT NULL,
        generation INTEGER NOT NULL DEFAULT 0,
        enqueued_at INTEGER NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS sync_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Version 2: conflict log
const V2: &str = "
    CREATE TABLE IF NOT EXISTS sync_conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id TEXT NOT NULL,
        local_updated_at INTEGER NOT NULL,
        incoming_updated_at INTEGER NOT NULL,
        local_revision INTEGER NOT NULL,
        incoming_revision INTEGER NOT NULL,
        winner TEXT NOT NULL,
        resolved_at INTEGER NOT NULL,
        strategy TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entry_id ON sync_conflicts(entry_id);
    CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC);
";

fn migrate(conn: &Connection, version: i32, statements: &str) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(statements)?;
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}
