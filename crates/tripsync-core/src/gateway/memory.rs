//! In-process document store.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{ChangeBatch, ChangeHandler, RemoteChange, RemoteError, RemoteGateway, RemoteResult, WakeHint};
use crate::models::{EntryId, ScheduleEntry, SyncCursor};

#[derive(Default)]
struct State {
    documents: BTreeMap<EntryId, ScheduleEntry>,
    /// Every accepted write in order; the cursor is an index into it.
    log: Vec<ScheduleEntry>,
    push_faults: VecDeque<RemoteError>,
    fetch_faults: VecDeque<RemoteError>,
    push_calls: usize,
    fetch_calls: usize,
    latency: Option<Duration>,
}

/// Authoritative store kept in memory.
///
/// Revisions and cursors behave like the hosted service: an accepted push is
/// stored at `submitted + 1`, a stale one gets a conflict, and the cursor is
/// the position in the global change log. Writes by other devices are
/// simulated with [`MemoryGateway::remote_write`].
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    subscribers: Mutex<Vec<ChangeHandler>>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, entry_id: &EntryId) {
        let handlers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler(WakeHint {
                entry_ids: vec![entry_id.clone()],
            });
        }
    }

    fn latency(&self) -> Option<Duration> {
        self.state().latency
    }

    /// Write a document as another device would: the revision is bumped past
    /// whatever the store holds. Subscribers are notified.
    pub fn remote_write(&self, entry: &ScheduleEntry) -> ScheduleEntry {
        let stored = {
            let mut state = self.state();
            let current = state
                .documents
                .get(&entry.id)
                .map_or(0, |existing| existing.revision);
            let stored = ScheduleEntry {
                revision: current.max(entry.revision) + 1,
                ..entry.clone()
            };
            state.documents.insert(stored.id.clone(), stored.clone());
            state.log.push(stored.clone());
            stored
        };
        tracing::debug!("Remote actor wrote {} at revision {}", stored.id, stored.revision);
        self.notify(&stored.id);
        stored
    }

    /// Fail the next push with `error`. Queued faults are consumed in order.
    pub fn fail_next_push(&self, error: RemoteError) {
        self.state().push_faults.push_back(error);
    }

    /// Fail the next fetch with `error`.
    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.state().fetch_faults.push_back(error);
    }

    /// Delay every fetch and push by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    pub fn document(&self, id: &EntryId) -> Option<ScheduleEntry> {
        self.state().documents.get(id).cloned()
    }

    pub fn documents(&self) -> Vec<ScheduleEntry> {
        self.state().documents.values().cloned().collect()
    }

    /// Cursor pointing at the end of the change log.
    pub fn head(&self) -> SyncCursor {
        SyncCursor::new(self.state().log.len().to_string())
    }

    pub fn push_calls(&self) -> usize {
        self.state().push_calls
    }

    pub fn fetch_calls(&self) -> usize {
        self.state().fetch_calls
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    async fn fetch_since(&self, cursor: Option<&SyncCursor>) -> RemoteResult<ChangeBatch> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state();
        state.fetch_calls += 1;
        if let Some(error) = state.fetch_faults.pop_front() {
            return Err(error);
        }

        let start = match cursor {
            None => 0,
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .ok()
                .filter(|position| *position <= state.log.len())
                .ok_or_else(|| RemoteError::Rejected(format!("unknown cursor {cursor}")))?,
        };

        let changes = state.log[start..]
            .iter()
            .cloned()
            .map(|entry| RemoteChange { entry })
            .collect();
        Ok(ChangeBatch {
            changes,
            cursor: SyncCursor::new(state.log.len().to_string()),
            skipped: 0,
        })
    }

    async fn push(&self, entry: &ScheduleEntry) -> RemoteResult<ScheduleEntry> {
        if let Some(latency) = self.latency() {
            tokio::time::sleep(latency).await;
        }

        let stored = {
            let mut state = self.state();
            state.push_calls += 1;
            if let Some(error) = state.push_faults.pop_front() {
                return Err(error);
            }

            entry
                .validate()
                .map_err(|error| RemoteError::Rejected(error.to_string()))?;

            if let Some(existing) = state.documents.get(&entry.id) {
                if existing.revision > entry.revision {
                    return Err(RemoteError::Conflict(Box::new(existing.clone())));
                }
            }

            let stored = ScheduleEntry {
                revision: entry.revision + 1,
                ..entry.clone()
            };
            state.documents.insert(stored.id.clone(), stored.clone());
            state.log.push(stored.clone());
            stored
        };

        self.notify(&stored.id);
        Ok(stored)
    }

    fn subscribe(&self, handler: ChangeHandler) {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn trip(title: &str) -> ScheduleEntry {
        ScheduleEntry::new("alice", title, "Sylhet", 0, 1_000).unwrap()
    }

    #[tokio::test]
    async fn push_assigns_next_revision() {
        let gateway = MemoryGateway::new();
        let stored = gateway.push(&trip("new")).await.unwrap();
        assert_eq!(stored.revision, 1);

        let again = gateway.push(&stored).await.unwrap();
        assert_eq!(again.revision, 2);
    }

    #[tokio::test]
    async fn stale_push_conflicts_with_stored_document() {
        let gateway = MemoryGateway::new();
        let entry = trip("shared");
        let stored = gateway.push(&entry).await.unwrap();
        let newer = gateway.remote_write(&stored);

        let error = gateway.push(&stored).await.unwrap_err();
        assert_eq!(error, RemoteError::Conflict(Box::new(newer)));
    }

    #[tokio::test]
    async fn invalid_document_is_rejected() {
        let gateway = MemoryGateway::new();
        let mut entry = trip("bad");
        entry.title = String::new();
        assert!(matches!(
            gateway.push(&entry).await,
            Err(RemoteError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn fetch_since_returns_changes_after_cursor() {
        let gateway = MemoryGateway::new();
        gateway.remote_write(&trip("a"));
        let first = gateway.fetch_since(None).await.unwrap();
        assert_eq!(first.changes.len(), 1);

        gateway.remote_write(&trip("b"));
        gateway.remote_write(&trip("c"));
        let second = gateway.fetch_since(Some(&first.cursor)).await.unwrap();
        let titles: Vec<_> = second
            .changes
            .iter()
            .map(|change| change.entry.title.as_str())
            .collect();
        assert_eq!(titles, vec!["b", "c"]);
        assert_eq!(second.cursor, gateway.head());
    }

    #[tokio::test]
    async fn unknown_cursor_is_rejected() {
        let gateway = MemoryGateway::new();
        let result = gateway.fetch_since(Some(&SyncCursor::new("42"))).await;
        assert!(matches!(result, Err(RemoteError::Rejected(_))));
    }

    #[tokio::test]
    async fn queued_faults_fire_once() {
        let gateway = MemoryGateway::new();
        gateway.fail_next_push(RemoteError::Transient("down".to_string()));

        assert!(gateway.push(&trip("x")).await.is_err());
        assert!(gateway.push(&trip("x")).await.is_ok());
        assert_eq!(gateway.push_calls(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_every_write() {
        let gateway = MemoryGateway::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        gateway.subscribe(Arc::new(move |hint: WakeHint| {
            assert_eq!(hint.entry_ids.len(), 1);
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        gateway.remote_write(&trip("a"));
        gateway.push(&trip("b")).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
