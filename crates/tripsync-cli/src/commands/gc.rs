use std::path::Path;

use chrono::Utc;

use crate::commands::common::open_store;
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_gc(config: &ClientConfig, db_path: &Path) -> Result<usize, CliError> {
    let store = open_store(db_path).await?;
    let cutoff = config.sync.tombstone_cutoff(Utc::now().timestamp_millis());
    let purged = store.purge_deleted(cutoff).await?;

    println!("Removed {purged} deleted entries");
    Ok(purged)
}
