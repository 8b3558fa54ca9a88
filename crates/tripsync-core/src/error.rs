//! Error types for tripsync-core

use thiserror::Error;

/// Result type alias using tripsync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tripsync-core operations
///
/// `Database`, `Sqlite` and `Io` make up the storage class: they abort the
/// current sync cycle but never the process.
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schedule entry or mutation not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error came from the on-device store.
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Sqlite(_) | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_class_covers_database_errors_only() {
        assert!(Error::Database("locked".to_string()).is_storage());
        assert!(Error::Io(std::io::Error::other("disk gone")).is_storage());
        assert!(Error::Sqlite(rusqlite::Error::InvalidQuery).is_storage());
        assert!(!Error::InvalidInput("empty title".to_string()).is_storage());
        assert!(!Error::Config("bad url".to_string()).is_storage());
    }
}
