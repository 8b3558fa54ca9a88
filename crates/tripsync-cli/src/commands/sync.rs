use std::path::Path;

use chrono::Utc;

use crate::commands::common::{
    build_engine, format_outcome_lines, format_relative_time, format_sync_conflict_lines,
    open_store, sync_conflict_to_item, SyncConflictItem,
};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_sync(config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    if config.gateway_config().is_none() {
        return Err(CliError::SyncNotConfigured);
    }

    let store = open_store(db_path).await?;
    let previous_sync = store.last_synced_at().await?;
    let engine = build_engine(store, config)?;

    let outcome = engine.request_sync().await?;
    for line in format_outcome_lines(&outcome) {
        println!("{line}");
    }
    if outcome.merged == 0 && outcome.pushed == 0 {
        if let Some(previous) = previous_sync {
            println!(
                "Previous sync {}",
                format_relative_time(previous, Utc::now().timestamp_millis())
            );
        }
    }
    Ok(())
}

pub async fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let conflicts = store.list_conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
