//! Connection and cache configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_INITIAL_DELAY_MS: u64 = 50;
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 800;
pub const DEFAULT_CAPACITY: usize = 750;

/// Settings for one direction of the mutation cache (writes or deletes)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, mutations in this direction go straight to the backend
    pub enabled: bool,
    /// Delay before the first scheduler tick
    pub initial_delay_ms: u64,
    /// Period between scheduler ticks
    pub tick_interval_ms: u64,
    /// Buffered triple count that triggers a flush
    pub capacity: usize,
    /// Buffer age that triggers a flush on the next tick. Defaults to the tick interval.
    pub max_age_ms: Option<u64>,
}

impl CacheConfig {
    pub fn write_default() -> Self {
        Self::default()
    }

    pub fn delete_default() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms.unwrap_or(self.tick_interval_ms))
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            capacity: DEFAULT_CAPACITY,
            max_age_ms: None,
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub write_cache: CacheConfig,
    pub delete_cache: CacheConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            write_cache: CacheConfig::write_default(),
            delete_cache: CacheConfig::delete_default(),
        }
    }
}

/// Server flavor behind an HTTP endpoint; they disagree on paths and on
/// how update bodies are posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreFlavor {
    Jena,
    Oxigraph,
}

/// Remote SPARQL endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreEndpoint {
    pub url: String,
    pub flavor: StoreFlavor,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl StoreEndpoint {
    pub fn new(url: impl Into<String>, flavor: StoreFlavor) -> Self {
        Self {
            url: url.into(),
            flavor,
            auth_token: None,
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn query_url(&self) -> String {
        match self.flavor {
            StoreFlavor::Jena => format!("{}/sparql", self.url.trim_end_matches('/')),
            StoreFlavor::Oxigraph => format!("{}/query", self.url.trim_end_matches('/')),
        }
    }

    pub fn update_url(&self) -> String {
        format!("{}/update", self.url.trim_end_matches('/'))
    }
}

/// Top-level file layout used by the command-line tool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub store: StoreEndpoint,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid configuration: {}", e)))?;
        config.connection.write_cache.validate()?;
        config.connection.delete_cache.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}
