//! Configuration system for leasehold.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $LEASEHOLD_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/leasehold/config.toml
//!   3. ~/.config/leasehold/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseholdConfig {
    pub network: NetworkConfig,
    pub lease: LeaseSettings,
    pub messages: MessageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// HTTP API port. 0 = OS-assigned.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseSettings {
    /// Lease deadline, counted from issuance.
    pub ttl_secs: u64,
    /// Push the deadline out by `ttl_secs` on every successful validation.
    pub refresh_on_access: bool,
    /// How often the background sweep reclaims expired leases.
    pub sweep_interval_ms: u64,
    /// How long retired/expired tokens are remembered for error reporting.
    pub tombstone_retention_secs: u64,
}

/// Whether message traffic needs a live lease or just the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageAuth {
    /// Token must validate right now.
    #[default]
    ActiveLease,
    /// An expired token still works until the run is leased again.
    TokenPossession,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageSettings {
    pub auth: MessageAuth,
    /// Per-run, per-direction queue bound. 0 = unbounded.
    pub max_queue_len: usize,
    /// TTL applied to messages that do not carry their own. 0 = never expire.
    pub default_ttl_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".to_string(),
            api_port: 9091,
        }
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            refresh_on_access: false,
            sweep_interval_ms: 1_000,
            tombstone_retention_secs: 600,
        }
    }
}

impl Default for MessageSettings {
    fn default() -> Self {
        Self {
            auth: MessageAuth::ActiveLease,
            max_queue_len: 1_024,
            default_ttl_secs: 3_600,
        }
    }
}

impl LeaseSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("leasehold")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl LeaseholdConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from an explicit path, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("LEASEHOLD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&LeaseholdConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Apply LEASEHOLD_* overrides. `lookup` is `std::env::var` in production.
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LEASEHOLD_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("LEASEHOLD_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(t) = lookup("LEASEHOLD_LEASE__TTL_SECS").and_then(|v| v.parse().ok()) {
            self.lease.ttl_secs = t;
        }
        if let Some(v) = lookup("LEASEHOLD_LEASE__REFRESH_ON_ACCESS") {
            self.lease.refresh_on_access = v == "true" || v == "1";
        }
        if let Some(v) = lookup("LEASEHOLD_MESSAGES__AUTH") {
            match v.as_str() {
                "active_lease" => self.messages.auth = MessageAuth::ActiveLease,
                "token_possession" => self.messages.auth = MessageAuth::TokenPossession,
                _ => {}
            }
        }
        if let Some(n) = lookup("LEASEHOLD_MESSAGES__MAX_QUEUE_LEN").and_then(|v| v.parse().ok()) {
            self.messages.max_queue_len = n;
        }
    }
}
