//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every field has a default, so a file only needs the values it changes and
//! a missing default file means "run with built-in defaults".

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{MonitorError, Result};
use crate::link::endpoint::LinkEndpoint;
use crate::link::manager::LinkSettings;
use crate::mavlink::decoder::DEFAULT_FRAME_BUFFER_CAPACITY;
use crate::store::TELEMETRY_COLLECTION;

/// Config file used when neither the CLI nor the environment names one
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "UAV_MONITOR_CONFIG";

/// Baud rates accepted for serial endpoints
pub const ALLOWED_BAUD_RATES: [u32; 9] = [9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600, 1500000];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Vehicle link configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LinkConfig {
    /// Candidates, tried in order
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<LinkEndpoint>,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Live reads fail once no heartbeat has been seen for this long
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_messages_per_drain")]
    pub max_messages_per_drain: usize,

    #[serde(default = "default_gcs_system_id")]
    pub gcs_system_id: u8,

    #[serde(default = "default_announce")]
    pub announce: bool,
}

/// Periods of the three scheduled tasks
#[derive(Debug, Deserialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_fast_poll_interval_ms")]
    pub fast_poll_interval_ms: u64,

    #[serde(default = "default_autosave_interval_ms")]
    pub autosave_interval_ms: u64,

    #[serde(default = "default_event_sync_interval_ms")]
    pub event_sync_interval_ms: u64,
}

/// Durable store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// `jsonl` or `memory`
    #[serde(default = "default_store_backend")]
    pub backend: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,

    #[serde(default = "default_telemetry_collection")]
    pub telemetry_collection: String,
}

/// Fire detection feed configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DetectionConfig {
    #[serde(default = "default_detection_enabled")]
    pub enabled: bool,

    /// Temperatures strictly above this are high severity
    #[serde(default = "default_severity_threshold")]
    pub severity_threshold: f64,

    #[serde(default = "default_feed_collection")]
    pub feed_collection: String,

    #[serde(default = "default_environment_collection")]
    pub environment_collection: String,

    #[serde(default = "default_reports_collection")]
    pub reports_collection: String,
}

/// Broadcast channel configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for daily log files; empty logs to the console only
    #[serde(default)]
    pub file_dir: String,
}

// Default value functions
fn default_endpoints() -> Vec<LinkEndpoint> {
    vec![LinkEndpoint::new("udp:127.0.0.1:14551", 57600)]
}
fn default_handshake_timeout_ms() -> u64 { 5000 }
fn default_connect_timeout_ms() -> u64 { 2000 }
fn default_heartbeat_timeout_ms() -> u64 { 5000 }
fn default_reconnect_interval_ms() -> u64 { 5000 }
fn default_max_messages_per_drain() -> usize { 1000 }
fn default_gcs_system_id() -> u8 { 255 }
fn default_announce() -> bool { true }

fn default_fast_poll_interval_ms() -> u64 { 500 }
fn default_autosave_interval_ms() -> u64 { 60_000 }
fn default_event_sync_interval_ms() -> u64 { 30_000 }

fn default_store_backend() -> String { "jsonl".to_string() }
fn default_data_dir() -> String { "./data".to_string() }
fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }
fn default_telemetry_collection() -> String { TELEMETRY_COLLECTION.to_string() }

fn default_detection_enabled() -> bool { true }
fn default_severity_threshold() -> f64 { 60.0 }
fn default_feed_collection() -> String { "sensors_thermal".to_string() }
fn default_environment_collection() -> String { "sensors_env".to_string() }
fn default_reports_collection() -> String { "fire_reports".to_string() }

fn default_channel_capacity() -> usize { 256 }

fn default_log_level() -> String { "info".to_string() }

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_messages_per_drain: default_max_messages_per_drain(),
            gcs_system_id: default_gcs_system_id(),
            announce: default_announce(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            fast_poll_interval_ms: default_fast_poll_interval_ms(),
            autosave_interval_ms: default_autosave_interval_ms(),
            event_sync_interval_ms: default_event_sync_interval_ms(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            data_dir: default_data_dir(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
            telemetry_collection: default_telemetry_collection(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: default_detection_enabled(),
            severity_threshold: default_severity_threshold(),
            feed_collection: default_feed_collection(),
            environment_collection: default_environment_collection(),
            reports_collection: default_reports_collection(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_dir: String::new(),
        }
    }
}

impl LinkConfig {
    /// Connection parameters for the link manager
    pub fn settings(&self) -> LinkSettings {
        LinkSettings {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            reconnect_interval: Duration::from_millis(self.reconnect_interval_ms),
            gcs_system_id: self.gcs_system_id,
            announce: self.announce,
            frame_buffer_capacity: DEFAULT_FRAME_BUFFER_CAPACITY,
        }
    }
}

fn invalid(message: impl std::fmt::Display) -> MonitorError {
    MonitorError::Config(toml::de::Error::custom(message))
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(invalid(format!("{} must be between {} and {}", name, min, max)));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use uav_monitor::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Locate and load the configuration
    ///
    /// An explicit path (CLI argument first, then `UAV_MONITOR_CONFIG`) must
    /// exist. Without one, `config/default.toml` is used if present, else the
    /// built-in defaults.
    ///
    /// # Returns
    ///
    /// * `(Config, Option<PathBuf>)` - The configuration and the file it came
    ///   from, if any
    pub fn resolve(cli_path: Option<String>, env_path: Option<String>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = cli_path.or(env_path).filter(|p| !p.trim().is_empty()) {
            let path = PathBuf::from(path);
            return Ok((Self::load(&path)?, Some(path)));
        }

        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Ok((Self::load(&default_path)?, Some(default_path)));
        }

        let config = Self::default();
        config.validate()?;
        Ok((config, None))
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Validate link endpoints
        if self.link.endpoints.is_empty() {
            return Err(invalid("link endpoints cannot be empty"));
        }

        for endpoint in &self.link.endpoints {
            endpoint
                .kind()
                .map_err(|e| invalid(format!("invalid endpoint '{}': {}", endpoint.address, e)))?;

            if !ALLOWED_BAUD_RATES.contains(&endpoint.baud) {
                return Err(invalid(format!(
                    "baud {} of endpoint '{}' must be one of: {:?}",
                    endpoint.baud, endpoint.address, ALLOWED_BAUD_RATES
                )));
            }
        }

        // Validate link timing
        check_range("handshake_timeout_ms", self.link.handshake_timeout_ms, 1, 60_000)?;
        check_range("connect_timeout_ms", self.link.connect_timeout_ms, 1, 60_000)?;
        check_range("heartbeat_timeout_ms", self.link.heartbeat_timeout_ms, 100, 300_000)?;
        check_range("reconnect_interval_ms", self.link.reconnect_interval_ms, 1, 300_000)?;
        check_range("max_messages_per_drain", self.link.max_messages_per_drain as u64, 1, 100_000)?;

        if self.link.gcs_system_id == 0 {
            return Err(invalid("gcs_system_id must be between 1 and 255"));
        }

        // Validate schedule
        check_range("fast_poll_interval_ms", self.schedule.fast_poll_interval_ms, 50, 60_000)?;
        check_range("autosave_interval_ms", self.schedule.autosave_interval_ms, 1_000, 86_400_000)?;
        check_range("event_sync_interval_ms", self.schedule.event_sync_interval_ms, 1_000, 86_400_000)?;

        // Validate store
        if !["jsonl", "memory"].contains(&self.store.backend.as_str()) {
            return Err(invalid("store backend must be 'jsonl' or 'memory'"));
        }

        if self.store.backend == "jsonl" && self.store.data_dir.is_empty() {
            return Err(invalid("store data_dir cannot be empty for the jsonl backend"));
        }

        if self.store.max_records_per_file == 0 {
            return Err(invalid("max_records_per_file must be greater than 0"));
        }

        if self.store.max_files_to_keep == 0 {
            return Err(invalid("max_files_to_keep must be greater than 0"));
        }

        for (name, collection) in [
            ("telemetry_collection", &self.store.telemetry_collection),
            ("feed_collection", &self.detection.feed_collection),
            ("environment_collection", &self.detection.environment_collection),
            ("reports_collection", &self.detection.reports_collection),
        ] {
            if collection.is_empty() {
                return Err(invalid(format!("{} cannot be empty", name)));
            }
        }

        // Validate detection
        if !self.detection.severity_threshold.is_finite() {
            return Err(invalid("severity_threshold must be a finite number"));
        }

        // Validate broadcast
        check_range("channel_capacity", self.broadcast.channel_capacity as u64, 1, 65_536)?;

        // Validate logging
        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging level cannot be empty"));
        }

        Ok(())
    }
}
