//! Sync tuning shared by every client.
//!
//! `SyncSettings` is loaded from the `sync` block of a client's JSON config.
//! Every field has a default, so an empty object is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const DEFAULT_PERIODIC_INTERVAL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_BACKOFF_INITIAL_MS: u64 = 500;
const DEFAULT_BACKOFF_MAX_MS: u64 = 60 * 1000;
const DEFAULT_MAX_ATTEMPTS_PER_CALL: u32 = 3;
const DEFAULT_TRANSIENT_FAILURE_CEILING: u32 = 5;
const DEFAULT_GATEWAY_TIMEOUT_MS: u64 = 15 * 1000;
const DEFAULT_TOMBSTONE_RETENTION_MS: u64 = 30 * 24 * 60 * 60 * 1000;
const DEFAULT_MAX_CONFLICT_REBASES: u32 = 2;

/// How a push conflict is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Newest `updated_at` wins, with deterministic tie-breaks.
    #[default]
    Lww,
    /// The remote version always wins.
    RemoteWins,
}

impl ConflictPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lww => "lww",
            Self::RemoteWins => "remote_wins",
        }
    }
}

/// Tuning knobs of the sync engine and worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSettings {
    /// Periodic trigger; `None` disables the timer.
    pub periodic_interval_ms: Option<u64>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    /// Attempts per gateway call within one cycle, first try included.
    pub max_attempts_per_call: u32,
    /// Consecutive transient cycles tolerated before reporting degraded.
    pub transient_failure_ceiling: u32,
    pub gateway_timeout_ms: u64,
    pub tombstone_retention_ms: u64,
    pub conflict_policy: ConflictPolicy,
    /// How often a locally winning edit is rebased and pushed again.
    pub max_conflict_rebases: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            periodic_interval_ms: Some(DEFAULT_PERIODIC_INTERVAL_MS),
            backoff_initial_ms: DEFAULT_BACKOFF_INITIAL_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_attempts_per_call: DEFAULT_MAX_ATTEMPTS_PER_CALL,
            transient_failure_ceiling: DEFAULT_TRANSIENT_FAILURE_CEILING,
            gateway_timeout_ms: DEFAULT_GATEWAY_TIMEOUT_MS,
            tombstone_retention_ms: DEFAULT_TOMBSTONE_RETENTION_MS,
            conflict_policy: ConflictPolicy::Lww,
            max_conflict_rebases: DEFAULT_MAX_CONFLICT_REBASES,
        }
    }
}

impl SyncSettings {
    /// Parse settings from a JSON payload and validate them.
    pub fn from_json(payload: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid sync settings: {error}")))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.periodic_interval_ms == Some(0) {
            return Err(Error::Config(
                "periodic_interval_ms must be positive (omit it to disable)".to_string(),
            ));
        }
        if self.backoff_initial_ms == 0 {
            return Err(Error::Config("backoff_initial_ms must be positive".to_string()));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(Error::Config(
                "backoff_max_ms must not be smaller than backoff_initial_ms".to_string(),
            ));
        }
        if self.max_attempts_per_call == 0 {
            return Err(Error::Config("max_attempts_per_call must be at least 1".to_string()));
        }
        if self.gateway_timeout_ms == 0 {
            return Err(Error::Config("gateway_timeout_ms must be positive".to_string()));
        }
        if i64::try_from(self.tombstone_retention_ms).is_err() {
            return Err(Error::Config("tombstone_retention_ms is too large".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn periodic_interval(&self) -> Option<Duration> {
        self.periodic_interval_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub const fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    /// Oldest `updated_at` a tombstone may have at `now_ms` and survive GC.
    #[must_use]
    pub fn tombstone_cutoff(&self, now_ms: i64) -> i64 {
        let retention = i64::try_from(self.tombstone_retention_ms).unwrap_or(i64::MAX);
        now_ms.saturating_sub(retention)
    }
}

/// Normalize a remote base URL: trimmed, http(s) only, no trailing slash.
pub fn normalize_api_base_url(raw: &str) -> Result<String> {
    let value = normalize_text_option(Some(raw.to_string()))
        .ok_or_else(|| Error::Config("api_base_url must not be empty".to_string()))?;
    if !is_http_url(&value) {
        return Err(Error::Config(
            "api_base_url must include http:// or https://".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_uses_defaults() {
        let settings = SyncSettings::from_json("{}").unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.periodic_interval(), Some(Duration::from_secs(300)));
        assert_eq!(settings.conflict_policy, ConflictPolicy::Lww);
    }

    #[test]
    fn partial_settings_override_defaults() {
        let settings = SyncSettings::from_json(
            r#"{"backoff_initial_ms": 10, "backoff_max_ms": 40, "conflict_policy": "remote_wins"}"#,
        )
        .unwrap();
        assert_eq!(settings.backoff_initial(), Duration::from_millis(10));
        assert_eq!(settings.backoff_max(), Duration::from_millis(40));
        assert_eq!(settings.conflict_policy, ConflictPolicy::RemoteWins);
        assert_eq!(settings.max_attempts_per_call, 3);
    }

    #[test]
    fn null_periodic_interval_disables_timer() {
        let settings = SyncSettings::from_json(r#"{"periodic_interval_ms": null}"#).unwrap();
        assert_eq!(settings.periodic_interval(), None);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = SyncSettings::from_json(r#"{"retry_forever": true}"#).unwrap_err();
        assert!(matches!(error, Error::Config(_)));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let error =
            SyncSettings::from_json(r#"{"backoff_initial_ms": 100, "backoff_max_ms": 10}"#)
                .unwrap_err();
        assert!(error.to_string().contains("backoff_max_ms"));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        assert!(SyncSettings::from_json(r#"{"max_attempts_per_call": 0}"#).is_err());
    }

    #[test]
    fn tombstone_cutoff_subtracts_retention() {
        let settings = SyncSettings {
            tombstone_retention_ms: 1_000,
            ..SyncSettings::default()
        };
        assert_eq!(settings.tombstone_cutoff(5_000), 4_000);
        assert_eq!(settings.tombstone_cutoff(i64::MIN), i64::MIN);
    }

    #[test]
    fn api_base_url_is_normalized() {
        assert_eq!(
            normalize_api_base_url("  https://api.example.com/ ").unwrap(),
            "https://api.example.com"
        );
        assert!(normalize_api_base_url("ftp://example.com").is_err());
        assert!(normalize_api_base_url("   ").is_err());
    }
}
