//! Schedule entry model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identifier of a schedule entry.
///
/// Locally created entries get a UUID v7 (time-sortable); identifiers that
/// arrive from the remote store are accepted verbatim as long as they are
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Create a new unique entry ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("Entry id cannot be empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// Mode of transport for a leg of a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Bus,
    Train,
}

impl TransportKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bus => "bus",
            Self::Train => "train",
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bus" => Ok(Self::Bus),
            "train" => Ok(Self::Train),
            other => Err(Error::InvalidInput(format!(
                "Unknown transport kind: {other}"
            ))),
        }
    }
}

/// A scheduled trip segment owned by one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    /// Unique identifier
    pub id: EntryId,
    /// Owning user
    pub owner_id: String,
    /// Short description shown in lists
    pub title: String,
    /// Free-form location (station, city, address)
    pub location: String,
    /// Departure (Unix ms, UTC)
    pub starts_at: i64,
    /// Arrival (Unix ms, UTC), never before `starts_at`
    pub ends_at: i64,
    /// Optional transport mode
    pub transport: Option<TransportKind>,
    /// Revision acknowledged by the remote store
    pub revision: i64,
    /// Last modification (Unix ms)
    pub updated_at: i64,
    /// Soft delete flag for sync
    pub is_deleted: bool,
}

impl ScheduleEntry {
    /// Create a new, not yet synced entry at revision 0.
    pub fn new(
        owner_id: impl Into<String>,
        title: impl Into<String>,
        location: impl Into<String>,
        starts_at: i64,
        ends_at: i64,
    ) -> Result<Self> {
        let entry = Self {
            id: EntryId::new(),
            owner_id: owner_id.into().trim().to_string(),
            title: title.into().trim().to_string(),
            location: location.into().trim().to_string(),
            starts_at,
            ends_at,
            transport: None,
            revision: 0,
            updated_at: chrono::Utc::now().timestamp_millis(),
            is_deleted: false,
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Set the transport mode
    #[must_use]
    pub const fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Check the entry invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            return Err(Error::InvalidInput("Entry id cannot be empty".to_string()));
        }
        if self.owner_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Entry owner_id cannot be empty".to_string(),
            ));
        }
        if self.title.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Entry title cannot be empty".to_string(),
            ));
        }
        if self.ends_at < self.starts_at {
            return Err(Error::InvalidInput(format!(
                "Entry {} ends before it starts",
                self.id
            )));
        }
        if self.revision < 0 {
            return Err(Error::InvalidInput(format!(
                "Entry {} has a negative revision",
                self.id
            )));
        }
        Ok(())
    }

    /// Copy of this entry marked as a tombstone at `now_ms`.
    #[must_use]
    pub fn tombstone(&self, now_ms: i64) -> Self {
        Self {
            is_deleted: true,
            updated_at: now_ms,
            ..self.clone()
        }
    }

    /// Duration of the trip segment in minutes.
    #[must_use]
    pub const fn duration_minutes(&self) -> i64 {
        self.ends_at.saturating_sub(self.starts_at) / 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_entry_id_unique() {
        let id1 = EntryId::new();
        let id2 = EntryId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_entry_id_parse_trims() {
        let id: EntryId = "  doc-42 ".parse().unwrap();
        assert_eq!(id.as_str(), "doc-42");
        assert!("   ".parse::<EntryId>().is_err());
    }

    #[test]
    fn test_entry_new() {
        let entry = ScheduleEntry::new("alice", " Dhaka to Sylhet ", "Kamalapur", 0, 2 * HOUR_MS)
            .unwrap()
            .with_transport(TransportKind::Train);

        assert_eq!(entry.title, "Dhaka to Sylhet");
        assert_eq!(entry.revision, 0);
        assert_eq!(entry.transport, Some(TransportKind::Train));
        assert_eq!(entry.duration_minutes(), 120);
        assert!(!entry.is_deleted);
    }

    #[test]
    fn test_entry_validation() {
        assert!(ScheduleEntry::new("", "title", "here", 0, 1).is_err());
        assert!(ScheduleEntry::new("alice", "  ", "here", 0, 1).is_err());
        assert!(ScheduleEntry::new("alice", "title", "here", 10, 5).is_err());
        assert!(ScheduleEntry::new("alice", "title", "", 5, 5).is_ok());
    }

    #[test]
    fn test_tombstone_keeps_revision() {
        let entry = ScheduleEntry::new("alice", "title", "here", 0, 1).unwrap();
        let tombstone = entry.tombstone(entry.updated_at + 5);
        assert!(tombstone.is_deleted);
        assert_eq!(tombstone.revision, entry.revision);
        assert_eq!(tombstone.updated_at, entry.updated_at + 5);
    }

    #[test]
    fn test_duration_of_extreme_span_saturates() {
        let entry = ScheduleEntry::new("alice", "forever", "", i64::MIN, i64::MAX).unwrap();
        assert_eq!(entry.duration_minutes(), i64::MAX / 60_000);
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("Bus".parse::<TransportKind>().unwrap(), TransportKind::Bus);
        assert_eq!(
            "train".parse::<TransportKind>().unwrap(),
            TransportKind::Train
        );
        assert!("ferry".parse::<TransportKind>().is_err());
    }
}
