use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
    pub room: RoomConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub url: String,
    pub op_timeout_seconds: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            op_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Secret used by the session layer to validate cookies. Resolved
    /// out-of-band; the core only carries it through to the resolver.
    pub secret: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

/// Room engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Trailing-edge coalescing window for sync publication (milliseconds)
    pub sync_debounce_ms: u64,
    /// Cadence of the periodic room update
    pub tick_interval_seconds: u64,
    /// A room with no participants for longer than this is unloaded
    pub unload_after_seconds: u64,
    /// Cadence of the eviction sweep
    pub unload_sweep_seconds: u64,
    /// Socket keepalive ping period
    pub keepalive_interval_seconds: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            sync_debounce_ms: 50,
            tick_interval_seconds: 1,
            unload_after_seconds: 240,
            unload_sweep_seconds: 10,
            keepalive_interval_seconds: 10,
        }
    }
}

impl Config {
    /// Load configuration by layering: defaults, then an optional file,
    /// then `ROOMCAST_`-prefixed environment variables
    /// (e.g. `ROOMCAST_BUS__URL=redis://cache:6379`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("ROOMCAST").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
