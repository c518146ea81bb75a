mod defaults;


use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::TetherError;
use defaults::*;

/// Top-level Tether configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tether: TetherConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub roster: RosterConfig,
}

/// General client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// The signed-in user this client acts for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Owner id used to tag the realtime channel. Empty = not yet resolved.
    #[serde(default)]
    pub user_id: String,
    /// Subscription tier (e.g. "Free", "Basic"). Matched case-insensitively.
    #[serde(default = "default_plan")]
    pub plan: String,
    /// Bearer token for the REST API. Empty = no Authorization header.
    #[serde(default)]
    pub api_token: String,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            plan: default_plan(),
            api_token: String::new(),
        }
    }
}

impl AccountConfig {
    /// The owner id, if one is configured.
    pub fn owner_id(&self) -> Option<&str> {
        let id = self.user_id.trim();
        (!id.is_empty()).then_some(id)
    }
}

/// REST API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Socket.IO endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Base URL of the Socket.IO server (`http(s)://` or `ws(s)://`).
    #[serde(default = "default_socket_url")]
    pub url: String,
    #[serde(default = "default_socket_path")]
    pub path: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_socket_url(),
            path: default_socket_path(),
        }
    }
}

/// Device roster synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Quiet period before a scheduled roster refresh fires.
    #[serde(default = "default_debounce_ms")]
    pub refresh_debounce_ms: u64,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            refresh_debounce_ms: default_debounce_ms(),
        }
    }
}

impl Config {
    /// Apply `TETHER_*` environment overrides from the given lookup.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |key: &str, slot: &mut String| {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                info!("config: {key} overrides file value");
                *slot = value;
            }
        };
        set("TETHER_API_URL", &mut self.api.base_url);
        set("TETHER_SOCKET_URL", &mut self.realtime.url);
        set("TETHER_USER_ID", &mut self.account.user_id);
        set("TETHER_API_TOKEN", &mut self.account.api_token);
        set("TETHER_PLAN", &mut self.account.plan);
    }
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, TetherError> {
    toml::from_str(content).map_err(|e| TetherError::Config(format!("failed to parse config: {e}")))
}

/// Load configuration from a TOML file, then apply environment overrides.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, TetherError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        parse(&content)?
    } else {
        info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}
