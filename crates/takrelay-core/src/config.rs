//! Configuration management for the TAKRelay server.
//!
//! Configuration is read once at startup and handed to the router, reaper and
//! listeners as plain values. Sources, in increasing precedence:
//! - built-in defaults
//! - a YAML file
//! - `TAKRELAY__SECTION__KEY` environment variables

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Root configuration.
///
/// # Examples
///
/// ```
/// use takrelay_core::config::RelayConfig;
///
/// let config = RelayConfig::from_yaml("server:\n  tcp_port: 8087\n").unwrap();
/// assert_eq!(config.server.tcp_port, 8087);
/// assert_eq!(config.router.inbound_capacity, 20);
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Listener ports
    #[serde(default)]
    pub server: ServerSection,

    /// Default map view served to web clients
    #[serde(default)]
    pub home: HomeConfig,

    /// Event processor settings
    #[serde(default)]
    pub router: RouterSection,

    /// Presence reaper settings
    #[serde(default)]
    pub presence: PresenceSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RelayConfig {
    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration from a file through the `config` crate, applying
    /// `TAKRELAY__*` environment overrides on top.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("TAKRELAY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let loaded: Self = config.try_deserialize().map_err(|e| ConfigError::InvalidFormat {
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(loaded)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.router.inbound_capacity == 0 {
            return Err(
                ConfigError::invalid_value("router.inbound_capacity", "must be greater than 0")
                    .into(),
            );
        }
        if self.router.outbound_capacity == 0 {
            return Err(ConfigError::invalid_value(
                "router.outbound_capacity",
                "must be greater than 0",
            )
            .into());
        }
        if self.presence.reap_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "presence.reap_interval_secs",
                "must be greater than 0",
            )
            .into());
        }
        if self.presence.offline_timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "presence.offline_timeout_secs",
                "must be greater than 0",
            )
            .into());
        }
        if self.router.delivery == DeliveryMode::TryForTimeout && self.router.delivery_timeout_ms == 0 {
            warn!("router.delivery_timeout_ms is 0, try_for_timeout drops like drop_on_full");
        }
        self.home.validate()?;
        Ok(())
    }
}

/// Listener ports and bind host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    #[serde(default = "default_stream_port")]
    pub tcp_port: u16,

    #[serde(default = "default_stream_port")]
    pub udp_port: u16,

    #[serde(default = "default_web_port")]
    pub web_port: u16,

    /// Largest frame payload accepted from a client, in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

fn default_stream_port() -> u16 {
    8999
}

fn default_web_port() -> u16 {
    8080
}

fn default_max_frame_size() -> usize {
    10 * 1024 * 1024
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            tcp_port: default_stream_port(),
            udp_port: default_stream_port(),
            web_port: default_web_port(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ServerSection {
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_port)
    }

    pub fn web_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.web_port)
    }
}

/// Home coordinates and zoom for the default map view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomeConfig {
    #[serde(default = "default_home_lat")]
    pub lat: f64,

    #[serde(default = "default_home_lon")]
    pub lon: f64,

    #[serde(default = "default_home_zoom")]
    pub zoom: i8,
}

fn default_home_lat() -> f64 {
    35.462939
}

fn default_home_lon() -> f64 {
    -97.537283
}

fn default_home_zoom() -> i8 {
    5
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            lat: default_home_lat(),
            lon: default_home_lon(),
            zoom: default_home_zoom(),
        }
    }
}

impl HomeConfig {
    fn validate(&self) -> Result<()> {
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ConfigError::invalid_value(
                "home.lat",
                format!("{} is outside [-90, 90]", self.lat),
            )
            .into());
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ConfigError::invalid_value(
                "home.lon",
                format!("{} is outside [-180, 180]", self.lon),
            )
            .into());
        }
        if !(0..=20).contains(&self.zoom) {
            return Err(ConfigError::invalid_value(
                "home.zoom",
                format!("{} is outside 0..=20", self.zoom),
            )
            .into());
        }
        Ok(())
    }
}

/// What the router does when a client's outbound queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Drop the message immediately and count it
    DropOnFull,
    /// Wait up to `delivery_timeout_ms`, then drop and count
    TryForTimeout,
}

/// Event processor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSection {
    /// Capacity of the shared inbound queue
    #[serde(default = "default_inbound_capacity")]
    pub inbound_capacity: usize,

    /// Capacity of each client's outbound queue
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,

    #[serde(default = "default_delivery")]
    pub delivery: DeliveryMode,

    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Append every event to `<type>.log` under `log_dir`
    #[serde(default)]
    pub logging: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_inbound_capacity() -> usize {
    20
}

fn default_outbound_capacity() -> usize {
    256
}

fn default_delivery() -> DeliveryMode {
    DeliveryMode::DropOnFull
}

fn default_delivery_timeout_ms() -> u64 {
    50
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            inbound_capacity: default_inbound_capacity(),
            outbound_capacity: default_outbound_capacity(),
            delivery: default_delivery(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
            logging: false,
            log_dir: default_log_dir(),
        }
    }
}

impl RouterSection {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

/// Presence reaper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceSection {
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,

    /// Silence after which an online contact is marked offline
    #[serde(default = "default_offline_timeout")]
    pub offline_timeout_secs: u64,
}

fn default_reap_interval() -> u64 {
    60
}

fn default_offline_timeout() -> u64 {
    120
}

impl Default for PresenceSection {
    fn default() -> Self {
        Self {
            reap_interval_secs: default_reap_interval(),
            offline_timeout_secs: default_offline_timeout(),
        }
    }
}

impl PresenceSection {
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn offline_timeout(&self) -> Duration {
        Duration::from_secs(self.offline_timeout_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG` when set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
