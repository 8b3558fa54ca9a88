use std::path::Path;

use crate::commands::common::{format_pending_lines, open_store, pending_to_item, PendingItem};
use crate::error::CliError;

pub async fn run_pending(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mutations = store.drain_mutations().await?;

    if as_json {
        let json_items = mutations
            .iter()
            .map(pending_to_item)
            .collect::<Vec<PendingItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if mutations.is_empty() {
        println!("Nothing waiting to sync.");
        return Ok(());
    }

    for line in format_pending_lines(&mutations) {
        println!("{line}");
    }
    Ok(())
}
