// src/utils/config.rs
//! Engine configuration
//!
//! Loaded from an optional `netpanel.{toml,yaml,json}` file in the working
//! directory, then overridden by `NETPANEL__SECTION__KEY` environment
//! variables. Every section has defaults, so an empty environment yields a
//! usable configuration.

use crate::recording::compressor::CompressionLevel;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub proxy: ProxyConfig,
    pub interception: InterceptionConfig,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
    pub tamper: TamperConfig,
    pub events: EventsConfig,
    pub replay: ReplayConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
    pub archive: ArchiveConfig,
}

impl EngineConfig {
    /// Load from `netpanel.*` and the environment
    pub fn load() -> Result<Self> {
        Self::load_from("netpanel")
    }

    /// Load from a named file (extension optional) and the environment
    pub fn load_from(name: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .add_source(
                config::Environment::with_prefix("NETPANEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.store.capacity == 0 {
            return Err(EngineError::ConfigError(
                "store.capacity must be greater than 0".to_string(),
            ));
        }
        if self.dispatch.request_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "dispatch.request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.tamper.hold_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "tamper.hold_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.events.buffer == 0 {
            return Err(EngineError::ConfigError(
                "events.buffer must be greater than 0".to_string(),
            ));
        }
        if self.interception.mode == ModeSetting::Matching
            && self.interception.pattern.as_deref().map_or(true, str::is_empty)
        {
            return Err(EngineError::ConfigError(
                "interception.pattern is required when mode = \"matching\"".to_string(),
            ));
        }
        if self.archive.enabled && self.archive.batch_size == 0 {
            return Err(EngineError::ConfigError(
                "archive.batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Local HTTP proxy listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8888,
        }
    }
}

/// Interception mode as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSetting {
    #[default]
    Off,
    All,
    Matching,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InterceptionConfig {
    pub mode: ModeSetting,

    /// URL glob used by `matching` mode
    pub pattern: Option<String>,

    pub blocking_enabled: bool,

    /// JSON array of blocked domains
    pub blocklist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum records kept in memory
    pub capacity: usize,

    /// Minimum records evicted once capacity is exceeded
    pub evict_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            evict_batch: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Deadline for a forwarded request before it fails with `Timeout`
    pub request_timeout_ms: u64,
}

impl DispatchConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 15_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TamperConfig {
    /// How long a held request waits for a decision before it is dropped
    pub hold_timeout_ms: u64,
}

impl TamperConfig {
    pub fn hold_timeout(&self) -> Duration {
        Duration::from_millis(self.hold_timeout_ms)
    }
}

impl Default for TamperConfig {
    fn default() -> Self {
        Self {
            hold_timeout_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before the oldest are discarded
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { buffer: 1024 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Fill browser-like headers when the replayed request has none
    pub fill_default_headers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `netpanel_engine=debug`
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "127.0.0.1:9898".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,

    /// Directory holding the archive database
    pub base_dir: PathBuf,

    pub db_name: String,

    /// Records per write batch
    pub batch_size: usize,

    pub flush_interval_ms: u64,

    pub compression: CompressionLevel,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_dir: PathBuf::from(".netpanel"),
            db_name: "records.db".to_string(),
            batch_size: 100,
            flush_interval_ms: 1_000,
            compression: CompressionLevel::Fast,
        }
    }
}
