use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tripsync_core::models::TransportKind;
use tripsync_core::{
    EntryId, HttpGateway, LocalStore, PendingMutation, ScheduleEntry, SyncConflict, SyncEngine,
    SyncOutcome,
};

use crate::cli::TransportArg;
use crate::config::ClientConfig;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct EntryListItem {
    pub id: String,
    pub title: String,
    pub location: String,
    pub starts_at: i64,
    pub ends_at: i64,
    pub starts_at_iso: String,
    pub duration_minutes: i64,
    pub transport: Option<TransportKind>,
    pub revision: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct PendingItem {
    pub seq: i64,
    pub entry_id: String,
    pub kind: String,
    pub title: String,
    pub attempts: u32,
    pub enqueued_at: i64,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entry_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub local_revision: i64,
    pub incoming_revision: i64,
    pub winner: String,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
}

pub async fn open_store(db_path: &Path) -> Result<LocalStore, CliError> {
    Ok(LocalStore::open_path(db_path.to_path_buf()).await?)
}

/// Build an engine over the configured HTTP gateway.
pub fn build_engine(store: LocalStore, config: &ClientConfig) -> Result<Arc<SyncEngine>, CliError> {
    let Some(gateway_config) = config.gateway_config() else {
        return Err(CliError::SyncNotConfigured);
    };
    let gateway = HttpGateway::new(gateway_config)?;
    tracing::info!("Syncing with {}", gateway.base_url());
    Ok(Arc::new(SyncEngine::new(
        store,
        Arc::new(gateway),
        config.sync.clone(),
    )))
}

pub async fn resolve_entry(query: &str, store: &LocalStore) -> Result<ScheduleEntry, CliError> {
    let query = normalize_entry_identifier(query)?;

    if let Ok(entry_id) = query.parse::<EntryId>() {
        if let Some(entry) = store.get(&entry_id).await?.filter(|entry| !entry.is_deleted) {
            return Ok(entry);
        }
    }

    let matching_ids = store.list_ids_by_prefix(&query, 3).await?;

    match matching_ids.as_slice() {
        [] => Err(CliError::EntryNotFound(query)),
        [entry_id] => store
            .get(entry_id)
            .await?
            .ok_or(CliError::EntryNotFound(query)),
        _ => {
            let options = matching_ids
                .iter()
                .map(|id| short_id(id.as_str()))
                .collect::<Vec<_>>()
                .join(", ");

            Err(CliError::AmbiguousEntryId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub fn normalize_entry_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyEntryId)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn normalize_title(parts: &[String]) -> Result<String, CliError> {
    let joined = parts.join(" ");
    let title = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        Err(CliError::EmptyTitle)
    } else {
        Ok(title)
    }
}

/// Parse an RFC 3339 timestamp or a naive UTC `YYYY-MM-DD HH:MM[:SS]`.
pub fn parse_timestamp(value: &str) -> Result<i64, CliError> {
    let value = value.trim();
    if let Ok(date_time) = DateTime::parse_from_rfc3339(value) {
        return Ok(date_time.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc().timestamp_millis());
        }
    }
    Err(CliError::InvalidTime(value.to_string()))
}

pub const fn transport_kind(arg: TransportArg) -> TransportKind {
    match arg {
        TransportArg::Bus => TransportKind::Bus,
        TransportArg::Train => TransportKind::Train,
    }
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn format_entry_lines(entries: &[ScheduleEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|entry| {
            let id = short_id(entry.id.as_str());
            let when = format_sync_timestamp(entry.starts_at);
            let transport = entry.transport.map_or("", TransportKind::as_str);
            let title = truncate(&entry.title, 32);
            if entry.location.is_empty() {
                format!("{id:<13}  {when}  {title:<32}  {transport}")
            } else {
                format!("{id:<13}  {when}  {title:<32}  {transport:<5}  @ {}", entry.location)
            }
        })
        .collect()
}

pub fn entry_to_list_item(entry: &ScheduleEntry) -> EntryListItem {
    EntryListItem {
        id: entry.id.to_string(),
        title: entry.title.clone(),
        location: entry.location.clone(),
        starts_at: entry.starts_at,
        ends_at: entry.ends_at,
        starts_at_iso: format_sync_timestamp(entry.starts_at),
        duration_minutes: entry.duration_minutes(),
        transport: entry.transport,
        revision: entry.revision,
        updated_at: entry.updated_at,
    }
}

pub fn format_entry_details(entry: &ScheduleEntry) -> Vec<String> {
    let mut lines = vec![
        format!("id:         {}", entry.id),
        format!("title:      {}", entry.title),
        format!("departs:    {}", format_sync_timestamp(entry.starts_at)),
        format!("arrives:    {}", format_sync_timestamp(entry.ends_at)),
        format!("duration:   {}m", entry.duration_minutes()),
    ];
    if !entry.location.is_empty() {
        lines.push(format!("location:   {}", entry.location));
    }
    if let Some(transport) = entry.transport {
        lines.push(format!("transport:  {}", transport.as_str()));
    }
    lines.push(format!("revision:   {}", entry.revision));
    lines.push(format!(
        "modified:   {}",
        format_relative_time(entry.updated_at, Utc::now().timestamp_millis())
    ));
    lines
}

pub fn pending_to_item(mutation: &PendingMutation) -> PendingItem {
    PendingItem {
        seq: mutation.seq,
        entry_id: mutation.entry_id.to_string(),
        kind: mutation.kind.as_str().to_string(),
        title: mutation.snapshot.title.clone(),
        attempts: mutation.attempts,
        enqueued_at: mutation.enqueued_at,
    }
}

pub fn format_pending_lines(mutations: &[PendingMutation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    mutations
        .iter()
        .map(|mutation| {
            format!(
                "#{:<5} {:<6}  {:<13}  {:<32}  attempts={}  queued {}",
                mutation.seq,
                mutation.kind.as_str(),
                short_id(mutation.entry_id.as_str()),
                truncate(&mutation.snapshot.title, 32),
                mutation.attempts,
                format_relative_time(mutation.enqueued_at, now_ms)
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entry_id: conflict.entry_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        local_revision: conflict.local_revision,
        incoming_revision: conflict.incoming_revision,
        winner: conflict.winner.as_str().to_string(),
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<11}  entry={}  {} wins  local=r{}@{} incoming=r{}@{}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.entry_id,
                conflict.winner.as_str(),
                conflict.local_revision,
                conflict.local_updated_at,
                conflict.incoming_revision,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_outcome_lines(outcome: &SyncOutcome) -> Vec<String> {
    if outcome.coalesced {
        return vec!["Sync already running; request queued".to_string()];
    }

    let mut lines = vec![format!(
        "Sync completed: {} pushed, {} merged, {} conflicts resolved",
        outcome.pushed, outcome.merged, outcome.conflicts
    )];
    for rejection in &outcome.rejected {
        lines.push(format!(
            "Rejected {}: {}",
            short_id(rejection.entry_id.as_str()),
            rejection.reason
        ));
    }
    if outcome.skipped > 0 {
        lines.push(format!("Skipped {} malformed remote entries", outcome.skipped));
    }
    if let Some(reason) = &outcome.fetch_rejected {
        lines.push(format!("Remote refused to send changes: {reason}"));
    }
    if outcome.hit_transient_failure() {
        lines.push("Remote unavailable; pending edits will be retried".to_string());
    }
    if let Some(message) = &outcome.degraded {
        lines.push(format!("Warning: {message}"));
    }
    if outcome.cancelled {
        lines.push("Sync was cancelled".to_string());
    }
    lines
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let mut truncated = value.chars().take(max_chars.saturating_sub(3)).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("TRIPSYNC_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripsync")
        .join("tripsync.db")
}
