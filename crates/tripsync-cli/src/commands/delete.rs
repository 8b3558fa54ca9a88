use std::path::Path;

use crate::commands::common::{open_store, resolve_entry};
use crate::error::CliError;

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entry = resolve_entry(id, &store).await?;

    store.delete_entry(&entry.id).await?;
    println!("{}", entry.id);
    Ok(())
}
