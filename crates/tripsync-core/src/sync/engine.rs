//! The sync cycle.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::backoff::next_delay;
use super::outcome::{Rejection, SyncOutcome};
use super::resolve::resolve_conflict;
use super::{SyncError, SyncResult};
use crate::config::SyncSettings;
use crate::db::NewConflict;
use crate::gateway::{ChangeBatch, RemoteError, RemoteGateway, RemoteResult};
use crate::models::{ConflictWinner, PendingMutation, ScheduleEntry};
use crate::services::LocalStore;
use crate::state::{CyclePhase, SyncState};
use crate::util::unix_millis_now;

/// Callback invoked after every `request_sync` that ran at least one cycle.
pub type OutcomeListener = Arc<dyn Fn(&SyncOutcome) + Send + Sync>;

enum PushEnd {
    Done,
    Transient,
}

/// Reconciles a [`LocalStore`] with a [`RemoteGateway`].
///
/// Only one cycle runs at a time. Callers share the engine behind an `Arc`
/// and go through [`SyncEngine::request_sync`].
pub struct SyncEngine {
    store: LocalStore,
    gateway: Arc<dyn RemoteGateway>,
    settings: SyncSettings,
    cycle_lock: tokio::sync::Mutex<()>,
    run_again: AtomicBool,
    cancel_requested: AtomicBool,
    consecutive_transient: AtomicU32,
    phase: Mutex<CyclePhase>,
    state: Mutex<SyncState>,
    listeners: Mutex<Vec<OutcomeListener>>,
}

impl SyncEngine {
    pub fn new(store: LocalStore, gateway: Arc<dyn RemoteGateway>, settings: SyncSettings) -> Self {
        Self {
            store,
            gateway,
            settings,
            cycle_lock: tokio::sync::Mutex::new(()),
            run_again: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
            consecutive_transient: AtomicU32::new(0),
            phase: Mutex::new(CyclePhase::Idle),
            state: Mutex::new(SyncState::Synced),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn gateway(&self) -> Arc<dyn RemoteGateway> {
        Arc::clone(&self.gateway)
    }

    /// Current phase of the running cycle, `Idle` between cycles.
    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn sync_state(&self) -> SyncState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for sync outcomes.
    pub fn on_sync_outcome(&self, listener: OutcomeListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Stop the running cycle at the next mutation or change boundary.
    ///
    /// A cancel issued while no cycle runs applies to the next one.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Run sync cycles until no further request is pending.
    ///
    /// When a cycle is already running the request is folded into it: the
    /// runner does one more cycle and this call returns a `coalesced`
    /// outcome immediately.
    pub async fn request_sync(&self) -> SyncResult<SyncOutcome> {
        let mut total = SyncOutcome::default();

        loop {
            let Ok(guard) = self.cycle_lock.try_lock() else {
                if total.cycles == 0 {
                    self.run_again.store(true, Ordering::SeqCst);
                    tracing::debug!("Sync already running; request coalesced");
                    return Ok(SyncOutcome::coalesced());
                }
                break;
            };

            loop {
                self.run_again.store(false, Ordering::SeqCst);
                match self.run_cycle().await {
                    Ok(cycle) => total.absorb(cycle),
                    Err(error) => {
                        self.force_idle();
                        self.set_state(SyncState::Error);
                        tracing::warn!("Sync cycle aborted: {error}");
                        return Err(error);
                    }
                }
                if total.cancelled || !self.run_again.load(Ordering::SeqCst) {
                    break;
                }
                tracing::debug!("Running another cycle for coalesced requests");
            }

            if total.cancelled {
                self.cancel_requested.store(false, Ordering::SeqCst);
            }
            drop(guard);
            if total.cancelled || !self.run_again.load(Ordering::SeqCst) {
                break;
            }
        }

        tracing::info!(
            pushed = total.pushed,
            conflicts = total.conflicts,
            merged = total.merged,
            skipped = total.skipped,
            rejected = total.rejected.len(),
            transient_failures = total.transient_failures,
            cycles = total.cycles,
            cancelled = total.cancelled,
            "Sync finished"
        );
        self.notify(&total);
        Ok(total)
    }

    fn notify(&self, outcome: &SyncOutcome) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(outcome);
        }
    }

    fn transition(&self, next: CyclePhase) -> SyncResult<()> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !phase.can_transition(next) {
            return Err(SyncError::Phase {
                from: *phase,
                to: next,
            });
        }
        tracing::debug!("Sync phase {:?} -> {:?}", *phase, next);
        *phase = next;
        Ok(())
    }

    fn force_idle(&self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = CyclePhase::Idle;
    }

    fn set_state(&self, state: SyncState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn run_cycle(&self) -> SyncResult<SyncOutcome> {
        let mut outcome = SyncOutcome {
            cycles: 1,
            ..SyncOutcome::default()
        };
        let previous_state = self.sync_state();
        self.set_state(SyncState::Syncing);

        let pending = self.store.drain_mutations().await?;
        if !pending.is_empty() {
            self.transition(CyclePhase::Draining)?;
            self.drain(pending, &mut outcome).await?;
        }

        if !outcome.cancelled && self.is_cancelled() {
            tracing::info!("Sync cancelled before fetching");
            outcome.cancelled = true;
        }
        if outcome.cancelled {
            if self.phase() != CyclePhase::Idle {
                self.transition(CyclePhase::Idle)?;
            }
            self.set_state(previous_state);
            return Ok(outcome);
        }

        self.transition(CyclePhase::Fetching)?;
        let cursor = self.store.load_cursor().await?;
        let fetched = self
            .call_with_retry("fetch", || self.gateway.fetch_since(cursor.as_ref()))
            .await;

        match fetched {
            Ok(batch) => {
                self.transition(CyclePhase::Merging)?;
                self.merge(batch, &mut outcome).await?;
            }
            Err(RemoteError::Transient(reason)) => {
                outcome.transient_failures += 1;
                tracing::warn!("Fetch failed, remote unavailable: {reason}");
            }
            Err(error) => {
                let reason = match error {
                    RemoteError::Rejected(reason) => reason,
                    other => other.to_string(),
                };
                tracing::warn!("Fetch refused by remote: {reason}");
                if cursor.is_some() && self.store.clear_cursor().await? {
                    tracing::info!("Dropped sync cursor; next fetch starts from the beginning");
                }
                outcome.fetch_rejected = Some(reason);
            }
        }
        self.transition(CyclePhase::Idle)?;

        if !outcome.cancelled {
            let cutoff = self.settings.tombstone_cutoff(unix_millis_now());
            outcome.purged = self.store.purge_deleted(cutoff).await?;
            if outcome.purged > 0 {
                tracing::info!("Purged {} expired tombstones", outcome.purged);
            }
        }

        self.settle(&mut outcome, previous_state);
        Ok(outcome)
    }

    /// Update the transient streak and the observable state after a cycle.
    fn settle(&self, outcome: &mut SyncOutcome, previous_state: SyncState) {
        if outcome.cancelled {
            self.set_state(previous_state);
            return;
        }
        if !outcome.hit_transient_failure() {
            self.consecutive_transient.store(0, Ordering::SeqCst);
            self.set_state(if outcome.fetch_rejected.is_some() {
                SyncState::Error
            } else {
                SyncState::Synced
            });
            return;
        }

        let streak = self.consecutive_transient.fetch_add(1, Ordering::SeqCst) + 1;
        if streak > self.settings.transient_failure_ceiling {
            let message = format!(
                "Remote unreachable for {streak} consecutive sync cycles; edits stay queued"
            );
            tracing::warn!("{message}");
            outcome.degraded = Some(message);
            self.set_state(SyncState::Offline);
        } else {
            self.set_state(previous_state);
        }
    }

    async fn drain(
        &self,
        pending: Vec<PendingMutation>,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        for mutation in pending {
            if self.is_cancelled() {
                tracing::info!("Sync cancelled while draining");
                outcome.cancelled = true;
                return Ok(());
            }
            let end = self.push_mutation(mutation, outcome).await?;
            if self.is_cancelled() {
                tracing::info!("Sync cancelled while draining");
                outcome.cancelled = true;
                return Ok(());
            }
            if let PushEnd::Transient = end {
                break;
            }
        }
        Ok(())
    }

    async fn push_mutation(
        &self,
        mut mutation: PendingMutation,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<PushEnd> {
        let mut rebases = 0;

        loop {
            self.store.mark_attempt(mutation.seq).await?;
            let pushed = self
                .call_with_retry("push", || self.gateway.push(&mutation.snapshot))
                .await;

            match pushed {
                Ok(acknowledged) => {
                    self.store.complete_push(&mutation, &acknowledged).await?;
                    outcome.pushed += 1;
                    tracing::debug!(
                        "Pushed {} {} at revision {}",
                        mutation.kind.as_str(),
                        acknowledged.id,
                        acknowledged.revision
                    );
                    return Ok(PushEnd::Done);
                }
                Err(RemoteError::Transient(reason)) => {
                    outcome.transient_failures += 1;
                    tracing::warn!(
                        "Push of {} failed, remote unavailable: {reason}",
                        mutation.entry_id
                    );
                    return Ok(PushEnd::Transient);
                }
                Err(RemoteError::Rejected(reason)) => {
                    self.store.discard_mutation(&mutation).await?;
                    tracing::warn!("Remote rejected {}: {reason}", mutation.entry_id);
                    outcome.rejected.push(Rejection {
                        entry_id: mutation.entry_id.clone(),
                        reason,
                    });
                    return Ok(PushEnd::Done);
                }
                Err(RemoteError::Conflict(remote)) => {
                    outcome.conflicts += 1;
                    let winner =
                        resolve_conflict(self.settings.conflict_policy, &mutation.snapshot, &remote);
                    self.record_resolution(&mutation, &remote, winner).await?;

                    if winner == ConflictWinner::Remote {
                        return Ok(PushEnd::Done);
                    }
                    rebases += 1;
                    if rebases > self.settings.max_conflict_rebases {
                        tracing::warn!(
                            "Giving up on {} after {} rebases; it stays queued",
                            mutation.entry_id,
                            rebases - 1
                        );
                        return Ok(PushEnd::Done);
                    }
                    match self.store.mutation_for(&mutation.entry_id).await? {
                        Some(current) => mutation = current,
                        None => return Ok(PushEnd::Done),
                    }
                }
            }
        }
    }

    async fn record_resolution(
        &self,
        mutation: &PendingMutation,
        remote: &ScheduleEntry,
        winner: ConflictWinner,
    ) -> SyncResult<()> {
        let conflict = NewConflict {
            entry_id: mutation.entry_id.as_str(),
            local_updated_at: mutation.snapshot.updated_at,
            incoming_updated_at: remote.updated_at,
            local_revision: mutation.snapshot.revision,
            incoming_revision: remote.revision,
            winner,
            strategy: self.settings.conflict_policy.as_str(),
        };
        tracing::warn!(
            "Conflict on {}: local rev {} vs remote rev {}, {} wins",
            mutation.entry_id,
            mutation.snapshot.revision,
            remote.revision,
            winner.as_str()
        );

        match winner {
            ConflictWinner::Remote => {
                self.store
                    .resolve_remote_win(mutation, remote, &conflict)
                    .await?;
            }
            ConflictWinner::Local => {
                self.store
                    .resolve_local_win(mutation, remote, &conflict)
                    .await?;
            }
        }
        Ok(())
    }

    async fn merge(&self, batch: ChangeBatch, outcome: &mut SyncOutcome) -> SyncResult<()> {
        outcome.skipped += batch.skipped;
        if self.is_cancelled() {
            tracing::info!("Sync cancelled before merging; cursor left unchanged");
            outcome.cancelled = true;
            return Ok(());
        }

        for change in batch.changes {
            if self.is_cancelled() {
                tracing::info!("Sync cancelled while merging; cursor left unchanged");
                outcome.cancelled = true;
                return Ok(());
            }
            if self.store.apply_remote(&change.entry).await? {
                outcome.merged += 1;
                tracing::debug!(
                    "Merged {} at revision {}",
                    change.entry.id,
                    change.entry.revision
                );
            }
        }

        self.store
            .commit_fetch(&batch.cursor, unix_millis_now())
            .await?;
        Ok(())
    }

    /// Call the gateway, retrying transient failures with backoff.
    async fn call_with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let timeout = self.settings.gateway_timeout();
        let mut delay = self.settings.backoff_initial();
        let mut attempt = 1;

        loop {
            let result = tokio::time::timeout(timeout, call())
                .await
                .unwrap_or_else(|_| {
                    Err(RemoteError::Transient(format!(
                        "{operation} timed out after {}ms",
                        timeout.as_millis()
                    )))
                });

            match result {
                Err(RemoteError::Transient(reason))
                    if attempt < self.settings.max_attempts_per_call && !self.is_cancelled() =>
                {
                    tracing::debug!(
                        "{operation} attempt {attempt} failed ({reason}); retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    delay = next_delay(delay, self.settings.backoff_max());
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fast_settings() -> SyncSettings {
        SyncSettings {
            backoff_initial_ms: 1,
            backoff_max_ms: 4,
            gateway_timeout_ms: 1_000,
            ..SyncSettings::default()
        }
    }

    async fn setup() -> (SyncEngine, Arc<MemoryGateway>) {
        let store = LocalStore::open_in_memory().await.unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let engine = SyncEngine::new(store, gateway.clone(), fast_settings());
        (engine, gateway)
    }

    fn trip(title: &str) -> ScheduleEntry {
        ScheduleEntry::new("alice", title, "Comilla", 0, 3_600_000).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn idle_cycle_fetches_and_returns_to_idle() {
        let (engine, gateway) = setup().await;
        gateway.remote_write(&trip("from elsewhere"));

        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.cycles, 1);
        assert_eq!(outcome.merged, 1);
        assert_eq!(engine.phase(), CyclePhase::Idle);
        assert_eq!(engine.sync_state(), SyncState::Synced);
        assert_eq!(engine.store().load_cursor().await.unwrap(), Some(gateway.head()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pushes_pending_mutations() {
        let (engine, gateway) = setup().await;
        let entry = engine.store().create_entry(trip("new")).await.unwrap();

        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.pushed, 1);
        assert_eq!(engine.store().pending_count().await.unwrap(), 0);
        assert_eq!(gateway.document(&entry.id).unwrap().revision, 1);
        assert_eq!(engine.store().get(&entry.id).await.unwrap().unwrap().revision, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transient_push_is_retried_inline() {
        let (engine, gateway) = setup().await;
        engine.store().create_entry(trip("flaky")).await.unwrap();
        gateway.fail_next_push(RemoteError::Transient("503".to_string()));

        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.pushed, 1);
        assert_eq!(outcome.transient_failures, 0);
        assert_eq!(gateway.push_calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn exhausted_retries_leave_mutation_queued() {
        let (engine, gateway) = setup().await;
        engine.store().create_entry(trip("offline")).await.unwrap();
        for _ in 0..3 {
            gateway.fail_next_push(RemoteError::Transient("down".to_string()));
        }

        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.pushed, 0);
        assert_eq!(outcome.transient_failures, 1);
        assert_eq!(engine.store().pending_count().await.unwrap(), 1);
        let queued = engine.store().drain_mutations().await.unwrap();
        assert_eq!(queued[0].attempts, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn listeners_receive_outcomes() {
        let (engine, _gateway) = setup().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on_sync_outcome(Arc::new(move |outcome: &SyncOutcome| {
            sink.lock().unwrap().push(outcome.cycles);
        }));

        engine.request_sync().await.unwrap();
        engine.request_sync().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 1]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn degraded_after_transient_ceiling() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let settings = SyncSettings {
            max_attempts_per_call: 1,
            transient_failure_ceiling: 2,
            ..fast_settings()
        };
        let engine = SyncEngine::new(store, gateway.clone(), settings);

        for _ in 0..2 {
            gateway.fail_next_fetch(RemoteError::Transient("down".to_string()));
            let outcome = engine.request_sync().await.unwrap();
            assert_eq!(outcome.degraded, None);
        }

        gateway.fail_next_fetch(RemoteError::Transient("down".to_string()));
        let outcome = engine.request_sync().await.unwrap();
        assert!(outcome.degraded.is_some());
        assert_eq!(engine.sync_state(), SyncState::Offline);

        let recovered = engine.request_sync().await.unwrap();
        assert_eq!(recovered.degraded, None);
        assert_eq!(engine.sync_state(), SyncState::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refused_fetch_is_reported_and_drops_cursor() {
        let (engine, gateway) = setup().await;
        gateway.remote_write(&trip("first"));
        engine.request_sync().await.unwrap();
        assert!(engine.store().load_cursor().await.unwrap().is_some());

        gateway.fail_next_fetch(RemoteError::Rejected("cursor expired".to_string()));
        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.fetch_rejected.as_deref(), Some("cursor expired"));
        assert_eq!(outcome.transient_failures, 0);
        assert_eq!(engine.sync_state(), SyncState::Error);
        assert_eq!(engine.phase(), CyclePhase::Idle);
        assert_eq!(engine.store().load_cursor().await.unwrap(), None);

        let recovered = engine.request_sync().await.unwrap();
        assert_eq!(recovered.fetch_rejected, None);
        assert_eq!(engine.sync_state(), SyncState::Synced);
        assert_eq!(engine.store().load_cursor().await.unwrap(), Some(gateway.head()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_during_push_skips_fetch() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_latency(Some(Duration::from_millis(100)));
        for _ in 0..3 {
            gateway.fail_next_push(RemoteError::Transient("down".to_string()));
        }
        let engine = Arc::new(SyncEngine::new(store, gateway.clone(), fast_settings()));
        engine.store().create_entry(trip("queued")).await.unwrap();

        let runner = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.request_sync().await })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        engine.cancel();

        let outcome = runner.await.unwrap().unwrap();
        assert!(outcome.cancelled);
        assert_eq!(gateway.push_calls(), 1);
        assert_eq!(gateway.fetch_calls(), 0);
        assert_eq!(engine.phase(), CyclePhase::Idle);
        assert_eq!(engine.store().load_cursor().await.unwrap(), None);
        assert_eq!(engine.store().pending_count().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_before_cycle_applies_once() {
        let (engine, gateway) = setup().await;
        engine.store().create_entry(trip("later")).await.unwrap();

        engine.cancel();
        let cancelled = engine.request_sync().await.unwrap();
        assert!(cancelled.cancelled);
        assert_eq!(gateway.push_calls(), 0);
        assert_eq!(gateway.fetch_calls(), 0);

        let outcome = engine.request_sync().await.unwrap();
        assert!(!outcome.cancelled);
        assert_eq!(outcome.pushed, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn storage_failure_aborts_cycle_until_store_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tripsync.db");
        let store = LocalStore::open_path(path.clone()).await.unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        let engine = SyncEngine::new(store, gateway.clone(), fast_settings());
        let entry = engine.store().create_entry(trip("pushed first")).await.unwrap();

        let side = rusqlite::Connection::open(&path).unwrap();
        side.execute_batch("ALTER TABLE sync_state RENAME TO sync_state_parked")
            .unwrap();

        let result = engine.request_sync().await;
        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert_eq!(engine.phase(), CyclePhase::Idle);
        assert_eq!(engine.sync_state(), SyncState::Error);
        assert_eq!(gateway.document(&entry.id).unwrap().revision, 1);
        assert_eq!(engine.store().pending_count().await.unwrap(), 0);

        side.execute_batch("ALTER TABLE sync_state_parked RENAME TO sync_state")
            .unwrap();

        let outcome = engine.request_sync().await.unwrap();
        assert_eq!(outcome.merged, 0);
        assert_eq!(engine.sync_state(), SyncState::Synced);
        assert_eq!(engine.store().load_cursor().await.unwrap(), Some(gateway.head()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn slow_gateway_times_out_as_transient() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let gateway = Arc::new(MemoryGateway::new());
        gateway.set_latency(Some(Duration::from_millis(200)));
        let settings = SyncSettings {
            gateway_timeout_ms: 20,
            max_attempts_per_call: 1,
            ..fast_settings()
        };
        let engine = SyncEngine::new(store, gateway, settings);

        let outcome = engine.request_sync().await.unwrap();

        assert_eq!(outcome.transient_failures, 1);
        assert_eq!(engine.store().load_cursor().await.unwrap(), None);
    }
}
