//! Push wake-ups and the background sync task.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::backoff::next_delay;
use super::engine::SyncEngine;
use crate::gateway::{ChangeHandler, WakeHint};

/// Entry point for push wake-ups.
///
/// Wakes land in a single-slot channel: while one is waiting, further wakes
/// are folded into it, so a burst of notifications costs at most one cycle.
#[derive(Clone)]
pub struct NotificationTrigger {
    sender: mpsc::Sender<WakeHint>,
}

impl NotificationTrigger {
    /// Ask the worker for an incremental sync. Never blocks.
    ///
    /// Returns `false` when the wake was coalesced into a pending one or the
    /// worker has stopped.
    pub fn on_wake(&self, hint: WakeHint) -> bool {
        match self.sender.try_send(hint) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Wake coalesced into pending sync");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Wake dropped; sync worker stopped");
                false
            }
        }
    }

    /// Adapter for [`RemoteGateway::subscribe`](crate::gateway::RemoteGateway::subscribe).
    pub fn handler(&self) -> ChangeHandler {
        let trigger = self.clone();
        Arc::new(move |hint| {
            trigger.on_wake(hint);
        })
    }
}

/// Background task that runs sync cycles on wake-ups, on a timer and after
/// transient failures.
pub struct SyncWorker {
    engine: Arc<SyncEngine>,
    trigger: NotificationTrigger,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncWorker {
    /// Start the worker and subscribe it to the engine's gateway.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        let (sender, receiver) = mpsc::channel(1);
        let trigger = NotificationTrigger { sender };
        engine.gateway().subscribe(trigger.handler());

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run(Arc::clone(&engine), receiver, shutdown.clone()));
        Self {
            engine,
            trigger,
            shutdown,
            handle,
        }
    }

    pub fn trigger(&self) -> NotificationTrigger {
        self.trigger.clone()
    }

    /// Stop the worker, cancelling a running cycle at its next boundary.
    pub async fn shutdown(self) {
        self.engine.cancel();
        self.shutdown.cancel();
        if let Err(error) = self.handle.await {
            tracing::warn!("Sync worker ended abnormally: {error}");
        }
    }
}

async fn run(
    engine: Arc<SyncEngine>,
    mut wakes: mpsc::Receiver<WakeHint>,
    shutdown: CancellationToken,
) {
    let settings = engine.settings().clone();
    let mut periodic = settings.periodic_interval().map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    let mut retry_delay = settings.backoff_initial();
    let mut retry_at: Option<Instant> = None;

    tracing::info!(
        periodic_ms = settings.periodic_interval_ms,
        "Sync worker started"
    );

    loop {
        let reason = tokio::select! {
            () = shutdown.cancelled() => break,
            wake = wakes.recv() => match wake {
                Some(hint) => {
                    tracing::debug!(hinted = hint.entry_ids.len(), "Wake received");
                    "wake"
                }
                None => break,
            },
            () = tick(periodic.as_mut()) => "periodic",
            () = sleep_until(retry_at) => "retry",
        };

        retry_at = None;
        tracing::debug!("Starting sync ({reason})");
        match engine.request_sync().await {
            Ok(outcome)
                if (outcome.hit_transient_failure() || outcome.fetch_rejected.is_some())
                    && !outcome.cancelled =>
            {
                tracing::info!("Retrying sync in {}ms", retry_delay.as_millis());
                retry_at = Some(Instant::now() + retry_delay);
                retry_delay = next_delay(retry_delay, settings.backoff_max());
            }
            Ok(_) => retry_delay = settings.backoff_initial(),
            Err(error) => tracing::warn!("Sync failed: {error}"),
        }
    }

    tracing::info!("Sync worker stopped");
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
