use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] tripsync_core::Error),
    #[error(transparent)]
    Sync(#[from] tripsync_core::SyncError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No entry title provided")]
    EmptyTitle,
    #[error("Entry ID cannot be empty")]
    EmptyEntryId,
    #[error("Entry not found for id/prefix: {0}")]
    EntryNotFound(String),
    #[error("{0}")]
    AmbiguousEntryId(String),
    #[error("Invalid time '{0}': use RFC 3339 or \"YYYY-MM-DD HH:MM\" (UTC)")]
    InvalidTime(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set api_base_url in the config file or TRIPSYNC_API_URL in the environment."
    )]
    SyncNotConfigured,
}

impl CliError {
    /// Whether the local database failed rather than input, config or the remote.
    pub const fn is_storage(&self) -> bool {
        match self {
            Self::Core(error) | Self::Sync(tripsync_core::SyncError::Storage(error)) => {
                error.is_storage()
            }
            _ => false,
        }
    }
}
