//! Store configuration.
//!
//! Loading flow:
//! 1. Compiled defaults ([`StoreConfig::default`])
//! 2. Optional JSON file, missing keys keep their defaults
//! 3. `KEYSPAN_*` environment variables (highest priority)
//!
//! Pool options are kept as caller overrides here and merged over
//! [`PoolOptions::default`] when a connection is configured.

use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_PORT: u16 = 9042;
pub const DEFAULT_MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

/// Connection, table and option settings for one persistence component.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Comma-separated contact points.
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Older name for `table`; `table` wins when both are set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    pub options: StoreOptions,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            datacenter: None,
            keyspace: None,
            username: None,
            password: None,
            table: None,
            collection: None,
            options: StoreOptions::default(),
        }
    }
}

/// The `options` section. Unset values fall back to component defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Milliseconds to wait for a new connection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    /// Milliseconds a pooled connection may sit idle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_page_size: Option<u64>,
}

/// Resolved driver pool settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolOptions {
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_pool_size: u32,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            idle_timeout_ms: 10_000,
            max_pool_size: 3,
        }
    }
}

impl PoolOptions {
    /// Overlay caller-supplied options on top of `self`.
    #[must_use]
    pub fn merged(&self, overrides: &StoreOptions) -> Self {
        Self {
            connect_timeout_ms: overrides.connect_timeout.unwrap_or(self.connect_timeout_ms),
            idle_timeout_ms: overrides.idle_timeout.unwrap_or(self.idle_timeout_ms),
            max_pool_size: overrides.max_pool_size.unwrap_or(self.max_pool_size),
        }
    }
}

impl StoreConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Effective table name (`table`, then `collection`).
    pub fn table_name(&self) -> Option<&str> {
        self.table.as_deref().or(self.collection.as_deref())
    }

    pub fn max_page_size(&self) -> u64 {
        self.options.max_page_size.unwrap_or(DEFAULT_MAX_PAGE_SIZE)
    }

    /// Contact points from `host`, trimmed, empties dropped.
    pub fn contact_points(&self) -> Vec<String> {
        self.host
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue("port must be non-zero".into()));
        }
        if self.options.max_page_size == Some(0) {
            return Err(ConfigError::InvalidValue(
                "options.max_page_size must be positive".into(),
            ));
        }
        if self.options.max_pool_size == Some(0) {
            return Err(ConfigError::InvalidValue(
                "options.max_pool_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Apply `KEYSPAN_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = read("KEYSPAN_HOST") {
            self.host = v;
        }
        if let Some(v) = read("KEYSPAN_PORT") {
            match v.parse::<u16>() {
                Ok(port) if port > 0 => self.port = port,
                _ => warn!(key = "KEYSPAN_PORT", value = %v, "invalid port env var, ignoring"),
            }
        }
        if let Some(v) = read("KEYSPAN_DATACENTER") {
            self.datacenter = Some(v);
        }
        if let Some(v) = read("KEYSPAN_KEYSPACE") {
            self.keyspace = Some(v);
        }
        if let Some(v) = read("KEYSPAN_USERNAME") {
            self.username = Some(v);
        }
        if let Some(v) = read("KEYSPAN_PASSWORD") {
            self.password = Some(SecretString::from(v));
        }
        if let Some(v) = read("KEYSPAN_TABLE") {
            self.table = Some(v);
        }
        if let Some(v) = read("KEYSPAN_MAX_PAGE_SIZE") {
            match v.parse::<u64>() {
                Ok(size) if size > 0 => self.options.max_page_size = Some(size),
                _ => warn!(key = "KEYSPAN_MAX_PAGE_SIZE", value = %v, "invalid page size env var, ignoring"),
            }
        }
    }
}

/// Load config from a JSON file with env overrides. A missing file yields
/// defaults.
pub fn load_config_from_path(path: &Path) -> Result<StoreConfig, ConfigError> {
    let mut config = if path.exists() {
        debug!(?path, "loading store config from file");
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        debug!(?path, "store config file not found, using defaults");
        StoreConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.map(SecretString::from))
}
