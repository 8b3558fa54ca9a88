use std::path::Path;

use tripsync_core::ScheduleEntry;

use crate::cli::AddArgs;
use crate::commands::common::{normalize_title, open_store, parse_timestamp, transport_kind};
use crate::config::ClientConfig;
use crate::error::CliError;

pub async fn run_add(args: &AddArgs, config: &ClientConfig, db_path: &Path) -> Result<(), CliError> {
    let title = normalize_title(&args.title)?;
    let starts_at = parse_timestamp(&args.start)?;
    let ends_at = args
        .end
        .as_deref()
        .map_or(Ok(starts_at), parse_timestamp)?;

    let mut entry = ScheduleEntry::new(
        config.owner(),
        title,
        args.location.clone().unwrap_or_default(),
        starts_at,
        ends_at,
    )?;
    if let Some(transport) = args.transport {
        entry = entry.with_transport(transport_kind(transport));
    }

    let store = open_store(db_path).await?;
    let entry = store.create_entry(entry).await?;

    println!("{}", entry.id);
    Ok(())
}
