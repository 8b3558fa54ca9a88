use std::path::Path;
use std::sync::Arc;

use tripsync_core::{SyncOutcome, SyncWorker, WakeHint};

use crate::commands::common::{build_engine, format_outcome_lines, open_store};
use crate::config::ClientConfig;
use crate::error::CliError;

/// Run the sync worker until Ctrl-C.
pub async fn run_watch(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let engine = build_engine(store, config)?;
    engine.on_sync_outcome(Arc::new(|outcome: &SyncOutcome| {
        for line in format_outcome_lines(outcome) {
            println!("{line}");
        }
    }));

    let worker = SyncWorker::spawn(engine);
    worker.trigger().on_wake(WakeHint::default());
    println!("Watching for changes. Press Ctrl-C to stop.");

    let stopped = tokio::signal::ctrl_c().await;
    worker.shutdown().await;
    stopped?;
    Ok(())
}
