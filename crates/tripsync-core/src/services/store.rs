//! On-device schedule store shared by the UI and the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    with_transaction, ConflictRepository, Database, EntryRepository, MutationRepository,
    NewConflict, SqliteConflictRepository, SqliteEntryRepository, SqliteMutationRepository,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    EntryId, MutationKind, PendingMutation, ScheduleEntry, SyncConflict, SyncCursor,
};
use crate::util::unix_millis_now;

/// Thread-safe handle over the local database.
///
/// The lock is held for exactly one operation, so readers never wait on
/// network I/O performed by a sync cycle.
#[derive(Clone)]
pub struct LocalStore {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
}

impl LocalStore {
    /// Open a store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and a fresh one created;
    /// pending edits in it are lost, remote data is re-fetched.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Detected corrupted local store at {}: {}. Resetting and retrying once.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
        })
    }

    /// Filesystem location, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = unix_millis_now();
            let base_name = db_path
                .file_name()
                .map_or_else(|| "tripsync.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let sidecar_prefix = format!("{base_name}-");

        for entry in std::fs::read_dir(parent)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with(&sidecar_prefix) {
                let path = entry.path();
                std::fs::remove_file(&path)?;
                tracing::warn!("Removed stale store sidecar {}", path.display());
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    /// Fetch an entry by id, tombstones included.
    pub async fn get(&self, id: &EntryId) -> Result<Option<ScheduleEntry>> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).get(id)
    }

    /// Live entries of one owner, ordered by departure.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ScheduleEntry>> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).list(owner_id)
    }

    /// Insert or replace an entry without queueing a mutation.
    pub async fn upsert(&self, entry: &ScheduleEntry) -> Result<()> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).upsert(entry)
    }

    /// Tombstone an entry without queueing a mutation.
    pub async fn soft_delete(&self, id: &EntryId) -> Result<ScheduleEntry> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).soft_delete(id, unix_millis_now())
    }

    /// Entry ids matching a prefix (for short-id lookups).
    pub async fn list_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<EntryId>> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).list_ids_by_prefix(prefix, limit)
    }

    // ------------------------------------------------------------------
    // Local edits
    // ------------------------------------------------------------------

    /// Save a new entry and queue its creation.
    pub async fn create_entry(&self, entry: ScheduleEntry) -> Result<ScheduleEntry> {
        let mut entry = entry;
        entry.updated_at = unix_millis_now();
        entry.is_deleted = false;

        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            let entries = SqliteEntryRepository::new(conn);
            if entries.get(&entry.id)?.is_some() {
                return Err(Error::InvalidInput(format!(
                    "Entry {} already exists",
                    entry.id
                )));
            }
            entries.upsert(&entry)?;
            SqliteMutationRepository::new(conn)
                .enqueue(&PendingMutation::new(MutationKind::Create, entry.clone()))?;
            Ok(())
        })?;

        tracing::debug!("Created entry {}", entry.id);
        Ok(entry)
    }

    /// Save an edit of an existing entry and queue it.
    ///
    /// The revision is taken from the stored copy: an edit is always based on
    /// what this device last saw, not on what the caller passed in.
    pub async fn update_entry(&self, entry: ScheduleEntry) -> Result<ScheduleEntry> {
        let mut entry = entry;

        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            let entries = SqliteEntryRepository::new(conn);
            let existing = entries
                .get(&entry.id)?
                .filter(|existing| !existing.is_deleted)
                .ok_or_else(|| Error::NotFound(entry.id.to_string()))?;

            entry.revision = existing.revision;
            entry.is_deleted = false;
            entry.updated_at = unix_millis_now().max(existing.updated_at + 1);
            entries.upsert(&entry)?;
            SqliteMutationRepository::new(conn)
                .enqueue(&PendingMutation::new(MutationKind::Update, entry.clone()))?;
            Ok(())
        })?;

        tracing::debug!("Updated entry {}", entry.id);
        Ok(entry)
    }

    /// Tombstone an entry and queue the deletion.
    pub async fn delete_entry(&self, id: &EntryId) -> Result<ScheduleEntry> {
        let db = self.db.lock().await;
        let conn = db.connection();
        let tombstone = with_transaction(conn, || {
            let entries = SqliteEntryRepository::new(conn);
            let existing = entries
                .get(id)?
                .filter(|existing| !existing.is_deleted)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;

            let tombstone = existing.tombstone(unix_millis_now().max(existing.updated_at + 1));
            entries.upsert(&tombstone)?;
            SqliteMutationRepository::new(conn)
                .enqueue(&PendingMutation::new(MutationKind::Delete, tombstone.clone()))?;
            Ok(tombstone)
        })?;

        tracing::debug!("Deleted entry {id}");
        Ok(tombstone)
    }

    /// Apply a local edit of the given kind and queue it in one transaction.
    pub async fn record_edit(
        &self,
        entry: ScheduleEntry,
        kind: MutationKind,
    ) -> Result<ScheduleEntry> {
        match kind {
            MutationKind::Create => self.create_entry(entry).await,
            MutationKind::Update => self.update_entry(entry).await,
            MutationKind::Delete => self.delete_entry(&entry.id).await,
        }
    }

    // ------------------------------------------------------------------
    // Pending mutations
    // ------------------------------------------------------------------

    /// Queue a mutation, coalescing with any queued one for the same entry.
    pub async fn enqueue_mutation(&self, mutation: &PendingMutation) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).enqueue(mutation)
    }

    /// Snapshot of the queue in sequence order. Mutations stay queued until
    /// removed.
    pub async fn drain_mutations(&self) -> Result<Vec<PendingMutation>> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).list()
    }

    /// Drop a mutation by sequence number.
    pub async fn remove_mutation(&self, seq: i64) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).remove(seq)
    }

    /// Drop a mutation unless a newer edit replaced it since it was read.
    pub async fn discard_mutation(&self, mutation: &PendingMutation) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection())
            .remove_if_generation(mutation.seq, mutation.generation)
    }

    /// Count a push attempt against a mutation.
    pub async fn mark_attempt(&self, seq: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).mark_attempt(seq)
    }

    /// Rewrite the base revision of a queued mutation.
    pub async fn rebase_mutation(&self, seq: i64, revision: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).rebase(seq, revision)
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).count()
    }

    /// Record a successful push.
    ///
    /// If the user edited the entry again while the push was in flight the
    /// newer edit stays queued, rebased on the acknowledged revision, and the
    /// local content is kept.
    pub async fn complete_push(
        &self,
        mutation: &PendingMutation,
        acknowledged: &ScheduleEntry,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            let entries = SqliteEntryRepository::new(conn);
            let mutations = SqliteMutationRepository::new(conn);

            if mutations.remove_if_generation(mutation.seq, mutation.generation)? {
                entries.apply_if_newer(acknowledged)?;
                return Ok(());
            }

            match mutations.get_for_entry(&acknowledged.id)? {
                Some(newer) => {
                    mutations.rebase(newer.seq, acknowledged.revision)?;
                    entries.raise_revision(&acknowledged.id, acknowledged.revision)?;
                    tracing::debug!(
                        "Entry {} changed during push; newer edit stays queued",
                        acknowledged.id
                    );
                }
                None => {
                    entries.apply_if_newer(acknowledged)?;
                }
            }
            Ok(())
        })
    }

    /// The remote version won a conflict: adopt it and drop the local edit.
    pub async fn resolve_remote_win(
        &self,
        mutation: &PendingMutation,
        remote: &ScheduleEntry,
        conflict: &NewConflict<'_>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            let mutations = SqliteMutationRepository::new(conn);
            if mutations.remove_if_generation(mutation.seq, mutation.generation)? {
                SqliteEntryRepository::new(conn).upsert(remote)?;
            } else {
                SqliteEntryRepository::new(conn).apply_if_newer(remote)?;
            }
            SqliteConflictRepository::new(conn).record(conflict, unix_millis_now())?;
            Ok(())
        })
    }

    /// The local edit won a conflict: rebase it on the remote revision.
    pub async fn resolve_local_win(
        &self,
        mutation: &PendingMutation,
        remote: &ScheduleEntry,
        conflict: &NewConflict<'_>,
    ) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            SqliteMutationRepository::new(conn).rebase(mutation.seq, remote.revision)?;
            SqliteEntryRepository::new(conn).raise_revision(&remote.id, remote.revision)?;
            SqliteConflictRepository::new(conn).record(conflict, unix_millis_now())?;
            Ok(())
        })
    }

    /// Re-read one queued mutation.
    pub async fn mutation_for(&self, entry_id: &EntryId) -> Result<Option<PendingMutation>> {
        let db = self.db.lock().await;
        SqliteMutationRepository::new(db.connection()).get_for_entry(entry_id)
    }

    // ------------------------------------------------------------------
    // Remote changes
    // ------------------------------------------------------------------

    /// Apply a remote version if it is newer than the local one.
    pub async fn apply_remote(&self, entry: &ScheduleEntry) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).apply_if_newer(entry)
    }

    /// Load the change-stream cursor.
    pub async fn load_cursor(&self) -> Result<Option<SyncCursor>> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).load_cursor()
    }

    /// Persist the change-stream cursor.
    pub async fn save_cursor(&self, cursor: &SyncCursor) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).save_cursor(cursor)
    }

    /// Drop the cursor; the next fetch replays the whole change stream.
    pub async fn clear_cursor(&self) -> Result<bool> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).clear_cursor()
    }

    /// Persist the cursor and the sync time together.
    pub async fn commit_fetch(&self, cursor: &SyncCursor, synced_at: i64) -> Result<()> {
        let db = self.db.lock().await;
        let conn = db.connection();
        with_transaction(conn, || {
            let state = SqliteSyncStateRepository::new(conn);
            state.save_cursor(cursor)?;
            state.set_last_synced_at(synced_at)
        })
    }

    /// Time of the last fully merged fetch.
    pub async fn last_synced_at(&self) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).last_synced_at()
    }

    /// Record the time of a fully merged fetch.
    pub async fn set_last_synced_at(&self, timestamp_ms: i64) -> Result<()> {
        let db = self.db.lock().await;
        SqliteSyncStateRepository::new(db.connection()).set_last_synced_at(timestamp_ms)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Append an entry to the conflict log.
    pub async fn record_conflict(&self, conflict: &NewConflict<'_>) -> Result<i64> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).record(conflict, unix_millis_now())
    }

    /// Recently resolved conflicts, newest first.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        SqliteConflictRepository::new(db.connection()).list(limit)
    }

    /// Delete tombstones older than `cutoff_ms`.
    pub async fn purge_deleted(&self, cutoff_ms: i64) -> Result<usize> {
        let db = self.db.lock().await;
        SqliteEntryRepository::new(db.connection()).purge_deleted(cutoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConflictWinner;
    use pretty_assertions::assert_eq;

    fn trip(title: &str) -> ScheduleEntry {
        ScheduleEntry::new("alice", title, "Kamalapur", 1_000, 61_000).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_entry_queues_a_create() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("Dhaka to Khulna")).await.unwrap();

        let queued = store.drain_mutations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, MutationKind::Create);
        assert_eq!(queued[0].snapshot, entry);
        assert_eq!(store.list("alice").await.unwrap(), vec![entry]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_entry_rejects_duplicates() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("twice")).await.unwrap();
        let result = store.create_entry(entry).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(store.pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_edits_coalesce_into_one_mutation() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let mut synced = trip("original");
        synced.revision = 1;
        store.upsert(&synced).await.unwrap();

        let mut first = synced.clone();
        first.title = "first edit".to_string();
        store.update_entry(first).await.unwrap();
        let first_seq = store.drain_mutations().await.unwrap()[0].seq;

        let mut second = synced.clone();
        second.title = "second edit".to_string();
        store.update_entry(second).await.unwrap();

        let queued = store.drain_mutations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].seq, first_seq);
        assert_eq!(queued[0].snapshot.title, "second edit");
        assert_eq!(queued[0].snapshot.revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_entry_keeps_stored_revision() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let mut synced = trip("original");
        synced.revision = 3;
        store.upsert(&synced).await.unwrap();

        let mut edit = synced.clone();
        edit.revision = 99;
        edit.location = "Airport".to_string();
        let saved = store.update_entry(edit).await.unwrap();

        assert_eq!(saved.revision, 3);
        assert!(saved.updated_at > synced.updated_at);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_entry_tombstones_and_queues() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("short lived")).await.unwrap();
        store.delete_entry(&entry.id).await.unwrap();

        assert!(store.list("alice").await.unwrap().is_empty());
        let queued = store.drain_mutations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, MutationKind::Delete);
        assert!(queued[0].snapshot.is_deleted);

        assert!(matches!(
            store.delete_entry(&entry.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn complete_push_removes_mutation_and_stores_ack() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("pushed")).await.unwrap();
        let mutation = store.drain_mutations().await.unwrap().remove(0);
        let acknowledged = ScheduleEntry {
            revision: 1,
            ..entry.clone()
        };

        store.complete_push(&mutation, &acknowledged).await.unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.get(&entry.id).await.unwrap().unwrap().revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn complete_push_keeps_edit_made_during_push() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("in flight")).await.unwrap();
        let in_flight = store.drain_mutations().await.unwrap().remove(0);

        let mut newer = entry.clone();
        newer.title = "edited meanwhile".to_string();
        store.update_entry(newer).await.unwrap();

        let acknowledged = ScheduleEntry {
            revision: 1,
            ..entry.clone()
        };
        store.complete_push(&in_flight, &acknowledged).await.unwrap();

        let queued = store.drain_mutations().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].snapshot.title, "edited meanwhile");
        assert_eq!(queued[0].snapshot.revision, 1);

        let local = store.get(&entry.id).await.unwrap().unwrap();
        assert_eq!(local.title, "edited meanwhile");
        assert_eq!(local.revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_remote_win_adopts_remote_and_logs() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let mut synced = trip("shared");
        synced.revision = 1;
        store.upsert(&synced).await.unwrap();
        let mut edit = synced.clone();
        edit.title = "mine".to_string();
        store.update_entry(edit).await.unwrap();
        let mutation = store.drain_mutations().await.unwrap().remove(0);

        let remote = ScheduleEntry {
            title: "theirs".to_string(),
            revision: 2,
            ..synced.clone()
        };
        let conflict = NewConflict {
            entry_id: remote.id.as_str(),
            local_updated_at: mutation.snapshot.updated_at,
            incoming_updated_at: remote.updated_at,
            local_revision: 1,
            incoming_revision: 2,
            winner: ConflictWinner::Remote,
            strategy: "lww",
        };
        store
            .resolve_remote_win(&mutation, &remote, &conflict)
            .await
            .unwrap();

        assert_eq!(store.pending_count().await.unwrap(), 0);
        assert_eq!(store.get(&synced.id).await.unwrap().unwrap(), remote);
        assert_eq!(store.list_conflicts(10).await.unwrap().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn commit_fetch_persists_cursor_and_time() {
        let store = LocalStore::open_in_memory().await.unwrap();
        assert_eq!(store.load_cursor().await.unwrap(), None);

        store
            .commit_fetch(&SyncCursor::new("c7"), 1_234)
            .await
            .unwrap();

        assert_eq!(
            store.load_cursor().await.unwrap(),
            Some(SyncCursor::new("c7"))
        );
        assert_eq!(store.last_synced_at().await.unwrap(), Some(1_234));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_keeps_tombstones_with_pending_mutations() {
        let store = LocalStore::open_in_memory().await.unwrap();

        let entry = store.create_entry(trip("queued delete")).await.unwrap();
        store.delete_entry(&entry.id).await.unwrap();

        assert_eq!(store.purge_deleted(i64::MAX).await.unwrap(), 0);
        store
            .remove_mutation(store.drain_mutations().await.unwrap()[0].seq)
            .await
            .unwrap();
        assert_eq!(store.purge_deleted(i64::MAX).await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_path_recovers_from_corrupted_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("tripsync.db");
        std::fs::write(&db_path, b"definitely not sqlite, just some bytes padded out to look like a header......").unwrap();

        let store = LocalStore::open_path(&db_path).await.unwrap();
        assert!(store.list("alice").await.unwrap().is_empty());

        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .starts_with("tripsync.db.corrupt-")
            })
            .count();
        assert_eq!(backups, 1);
    }
}
