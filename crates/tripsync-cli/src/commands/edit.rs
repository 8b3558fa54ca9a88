use std::path::Path;

use crate::cli::EditArgs;
use crate::commands::common::{
    normalize_title, open_store, parse_timestamp, resolve_entry, transport_kind,
};
use crate::error::CliError;

pub async fn run_edit(args: &EditArgs, db_path: &Path) -> Result<(), CliError> {
    let store = open_store(db_path).await?;
    let entry = resolve_entry(&args.id, &store).await?;

    let mut edited = entry.clone();
    if let Some(title) = &args.title {
        edited.title = normalize_title(std::slice::from_ref(title))?;
    }
    if let Some(location) = &args.location {
        edited.location = location.trim().to_string();
    }
    if let Some(start) = &args.start {
        edited.starts_at = parse_timestamp(start)?;
    }
    if let Some(end) = &args.end {
        edited.ends_at = parse_timestamp(end)?;
    }
    if let Some(transport) = args.transport {
        edited.transport = Some(transport_kind(transport));
    }

    if edited == entry {
        println!("{}", entry.id);
        return Ok(());
    }

    edited.validate()?;
    let updated = store.update_entry(edited).await?;
    println!("{}", updated.id);
    Ok(())
}
