//! Plugin configuration
//!
//! ```yaml
//! on_poll_error: stop_plugin
//! connections:
//!   - host: 192.168.1.10
//!     port: 502
//!     poll_interval: 5
//!     slaves:
//!       - unit_id: 1
//!         mappings:
//!           - function: read-holding-registers
//!             address: 100
//!             data_type: int16
//!             path: environment.water.temperature
//!             expression: "x * 0.1 + kelvin_offset"
//! ```

use std::path::Path;
use std::time::Duration;

use common::LoggingConfig;
use serde::{Deserialize, Serialize};

use crate::codec::DataType;
use crate::error::{ModlinkError, Result};
use crate::transport::FunctionCode;

/// Environment variable prefix for overrides, e.g. `MODLINK_ON_POLL_ERROR`
pub const ENV_PREFIX: &str = "MODLINK_";

pub const DEFAULT_PORT: u16 = 502;
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 20.0;
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_EXPRESSION: &str = "x";

/// Accepted poll interval range
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(7 * 24 * 3600);

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_poll_interval() -> f64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_expression() -> String {
    DEFAULT_EXPRESSION.to_string()
}

/// What a poll-time failure does to the rest of the plugin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollErrorPolicy {
    /// Report, then stop every connection
    #[default]
    StopPlugin,
    /// Report and retry on the next tick
    LogAndContinue,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,

    #[serde(default)]
    pub on_poll_error: PollErrorPolicy,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One Modbus TCP server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between polls, shared by every mapping of the connection
    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    /// Bound for connect and for each read
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub slaves: Vec<SlaveConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub unit_id: u8,

    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// One polled value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub function: FunctionCode,
    pub address: u16,
    pub data_type: DataType,
    pub path: String,

    #[serde(default = "default_expression")]
    pub expression: String,
}

impl MappingConfig {
    /// Words requested from the transport; always derived from `data_type`
    pub fn word_count(&self) -> u16 {
        self.data_type.word_count()
    }
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            slaves: Vec::new(),
        }
    }

    /// Connection identity, `host:port`
    pub fn id(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Poll period, clamped to the accepted range
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval)
            .unwrap_or(MIN_POLL_INTERVAL)
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Total mappings across all slaves
    pub fn mapping_count(&self) -> usize {
        self.slaves.iter().map(|s| s.mappings.len()).sum()
    }

    /// `(unit_id, mapping)` pairs in configuration order
    pub fn mappings(&self) -> impl Iterator<Item = (u8, &MappingConfig)> + '_ {
        self.slaves
            .iter()
            .flat_map(|slave| slave.mappings.iter().map(move |m| (slave.unit_id, m)))
    }

    pub fn validate(&self) -> Result<()> {
        let id = self.id();
        if self.host.trim().is_empty() {
            return Err(ModlinkError::config("Connection host is empty"));
        }
        let in_range = Duration::try_from_secs_f64(self.poll_interval)
            .is_ok_and(|d| (MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&d));
        if !in_range {
            return Err(ModlinkError::config(format!(
                "{}: poll_interval must be between {} and {} seconds, got {}",
                id,
                MIN_POLL_INTERVAL.as_secs_f64(),
                MAX_POLL_INTERVAL.as_secs_f64(),
                self.poll_interval
            )));
        }
        if self.timeout_ms == 0 {
            return Err(ModlinkError::config(format!("{}: timeout_ms must be > 0", id)));
        }

        for slave in &self.slaves {
            if slave.mappings.is_empty() {
                return Err(ModlinkError::config(format!(
                    "{}: slave {} has no mappings",
                    id, slave.unit_id
                )));
            }
            for mapping in &slave.mappings {
                if mapping.path.trim().is_empty() {
                    return Err(ModlinkError::config(format!(
                        "{}: slave {} address {} has an empty path",
                        id, slave.unit_id, mapping.address
                    )));
                }
                let end = u32::from(mapping.address) + u32::from(mapping.word_count());
                if end > 0x1_0000 {
                    return Err(ModlinkError::config(format!(
                        "{}: {} at address {} overflows the register space",
                        id, mapping.data_type, mapping.address
                    )));
                }
            }
        }
        Ok(())
    }
}

impl PluginConfig {
    /// Load from a YAML/TOML/JSON file, with `MODLINK_*` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        Ok(common::load_config(path, ENV_PREFIX)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.connections.iter().try_for_each(ConnectionConfig::validate)
    }

    pub fn mapping_count(&self) -> usize {
        self.connections.iter().map(ConnectionConfig::mapping_count).sum()
    }
}
