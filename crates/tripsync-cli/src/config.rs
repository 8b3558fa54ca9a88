//! Persistent client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tripsync_core::config::normalize_api_base_url;
use tripsync_core::util::normalize_text_option;
use tripsync_core::{HttpGatewayConfig, SyncSettings};

const CONFIG_FILE_NAME: &str = "config.json";
const DEFAULT_OWNER: &str = "local";
const DEFAULT_HEAD_POLL_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub head_poll_ms: Option<u64>,
    #[serde(default)]
    pub sync: SyncSettings,
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tripsync")
        .join(CONFIG_FILE_NAME)
}

impl ClientConfig {
    /// Load the config file (missing means defaults) and apply environment
    /// overrides.
    pub fn resolve(explicit_path: Option<&Path>) -> Result<Self, String> {
        let path = explicit_path.map_or_else(default_config_path, Path::to_path_buf);
        let mut config = Self::load_from_path(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    /// Apply `TRIPSYNC_API_URL`, `TRIPSYNC_AUTH_TOKEN` and `TRIPSYNC_OWNER`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = normalize_text_option(lookup("TRIPSYNC_API_URL")) {
            self.api_base_url = Some(url);
        }
        if let Some(token) = normalize_text_option(lookup("TRIPSYNC_AUTH_TOKEN")) {
            self.auth_token = Some(token);
        }
        if let Some(owner) = normalize_text_option(lookup("TRIPSYNC_OWNER")) {
            self.owner_id = Some(owner);
        }
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take());
        self.auth_token = normalize_text_option(self.auth_token.take());
        self.owner_id = normalize_text_option(self.owner_id.take());
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(url) = &self.api_base_url {
            normalize_api_base_url(url).map_err(|error| error.to_string())?;
        }
        if self.head_poll_ms == Some(0) {
            return Err("head_poll_ms must be positive".to_string());
        }
        self.sync.validate().map_err(|error| error.to_string())
    }

    pub fn owner(&self) -> &str {
        self.owner_id.as_deref().unwrap_or(DEFAULT_OWNER)
    }

    /// Gateway settings, `None` when no remote is configured.
    pub fn gateway_config(&self) -> Option<HttpGatewayConfig> {
        let base_url = self.api_base_url.clone()?;
        Some(HttpGatewayConfig {
            base_url,
            auth_token: self.auth_token.clone(),
            timeout: self.sync.gateway_timeout(),
            head_poll_interval: Duration::from_millis(
                self.head_poll_ms.unwrap_or(DEFAULT_HEAD_POLL_MS),
            ),
        })
    }
}
