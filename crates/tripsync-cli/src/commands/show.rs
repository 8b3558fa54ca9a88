use std::path::Path;

use crate::commands::common::{entry_to_list_item, format_entry_details, open_store, resolve_entry};
use crate::error::CliError;

pub async fn run_show(id: &str, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entry = resolve_entry(id, &store).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entry_to_list_item(&entry))?);
    } else {
        for line in format_entry_details(&entry) {
            println!("{line}");
        }
    }
    Ok(())
}
