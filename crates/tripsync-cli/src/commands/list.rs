use std::path::Path;

use crate::commands::common::{entry_to_list_item, format_entry_lines, open_store, EntryListItem};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_list(
    limit: usize,
    as_json: bool,
    config: &ClientConfig,
    db_path: &Path,
) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let mut entries = store.list(config.owner()).await?;
    entries.truncate(limit);

    if as_json {
        let json_items = entries
            .iter()
            .map(entry_to_list_item)
            .collect::<Vec<EntryListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
    } else if entries.is_empty() {
        println!("No entries yet. Add one with `tripsync add`.");
    } else {
        for line in format_entry_lines(&entries) {
            println!("{line}");
        }
    }

    Ok(())
}
