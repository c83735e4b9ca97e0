//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{Result, TelemetryError};
use crate::protocol::parser::RecordParser;
use crate::protocol::record::{Polarity, Variant};

/// Baud rates accepted for the telemetry link
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    9600, 19200, 38400, 57600, 115200, 230400, 250000, 460800, 500000, 921600,
];

/// Log levels accepted in `[logging]`
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Try `candidates` in order instead of `port`
    #[serde(default)]
    pub auto_detect: bool,

    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Delay after opening while the board resets
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// First backoff step after a read error
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Record decoding configuration
///
/// `polarity`, `num_channels` and `channel_label_offset` fall back to the
/// defaults of `variant` when left out.
#[derive(Debug, Deserialize, Clone)]
pub struct DecoderConfig {
    #[serde(default)]
    pub variant: Variant,

    #[serde(default)]
    pub polarity: Option<Polarity>,

    #[serde(default)]
    pub num_channels: Option<usize>,

    #[serde(default)]
    pub channel_label_offset: Option<usize>,

    /// Longest accepted line in bytes, 0 for no limit
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

/// History buffer configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

/// Snapshot polling configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write a daily-rolling log file here
    #[serde(default)]
    pub log_dir: Option<String>,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyACM0".to_string() }
fn default_baud_rate() -> u32 { 115200 }
fn default_candidates() -> Vec<String> {
    crate::serial::DEFAULT_DEVICE_PATHS.iter().map(|p| p.to_string()).collect()
}
fn default_read_timeout_ms() -> u64 { 100 }
fn default_poll_interval_ms() -> u64 { 10 }
fn default_settle_ms() -> u64 { 2000 }
fn default_reconnect_interval_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 5000 }
fn default_join_timeout_ms() -> u64 { 1000 }
fn default_channel_capacity() -> usize { 64 }

fn default_max_line_length() -> usize { 1024 }

fn default_history_size() -> usize { crate::telemetry::store::DEFAULT_HISTORY_SIZE }

fn default_refresh_interval_ms() -> u64 { 100 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: default_baud_rate(),
            auto_detect: false,
            candidates: default_candidates(),
            read_timeout_ms: default_read_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_ms: default_settle_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            join_timeout_ms: default_join_timeout_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            variant: Variant::default(),
            polarity: None,
            num_channels: None,
            channel_label_offset: None,
            max_line_length: default_max_line_length(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { history_size: default_history_size() }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { refresh_interval_ms: default_refresh_interval_ms() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
        }
    }
}

impl DecoderConfig {
    pub fn polarity(&self) -> Polarity {
        self.polarity.unwrap_or_else(|| self.variant.default_polarity())
    }

    pub fn num_channels(&self) -> usize {
        self.num_channels.unwrap_or_else(|| self.variant.default_num_channels())
    }

    pub fn channel_label_offset(&self) -> usize {
        self.channel_label_offset
            .unwrap_or_else(|| self.variant.default_label_offset())
    }

    /// Line length cap, `None` when disabled
    pub fn max_line_length(&self) -> Option<usize> {
        (self.max_line_length > 0).then_some(self.max_line_length)
    }

    pub fn parser(&self) -> RecordParser {
        RecordParser::new(self.polarity(), self.num_channels())
    }
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
    /// use serial_telemetry::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        let serial = &self.serial;

        if serial.port.is_empty() && !serial.auto_detect {
            return Err(invalid("serial port cannot be empty"));
        }

        if serial.auto_detect && serial.candidates.is_empty() {
            return Err(invalid("candidates cannot be empty when auto_detect is enabled"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&serial.baud_rate) {
            return Err(invalid(format!(
                "baud_rate must be one of: {}",
                SUPPORTED_BAUD_RATES
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        // Validate timing fields
        for (name, value, max) in [
            ("read_timeout_ms", serial.read_timeout_ms, 10000),
            ("poll_interval_ms", serial.poll_interval_ms, 1000),
            ("reconnect_interval_ms", serial.reconnect_interval_ms, 60000),
            ("max_backoff_ms", serial.max_backoff_ms, 60000),
            ("join_timeout_ms", serial.join_timeout_ms, 10000),
            ("refresh_interval_ms", self.display.refresh_interval_ms, 10000),
        ] {
            if value == 0 || value > max {
                return Err(invalid(format!("{} must be between 1 and {}", name, max)));
            }
        }

        if serial.settle_ms > 10000 {
            return Err(invalid("settle_ms must be between 0 and 10000"));
        }

        if serial.max_backoff_ms < serial.reconnect_interval_ms {
            return Err(invalid("max_backoff_ms must not be less than reconnect_interval_ms"));
        }

        if serial.channel_capacity == 0 {
            return Err(invalid("channel_capacity must be greater than 0"));
        }

        // Validate decoder
        let num_channels = self.decoder.num_channels();
        if num_channels == 0 || num_channels > 64 {
            return Err(invalid("num_channels must be between 1 and 64"));
        }

        if self.decoder.max_line_length > 0 && self.decoder.max_line_length < 16 {
            return Err(invalid("max_line_length must be 0 (unlimited) or at least 16"));
        }

        // Validate store
        if self.store.history_size == 0 || self.store.history_size > 100_000 {
            return Err(invalid("history_size must be between 1 and 100000"));
        }

        // Validate logging
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(invalid(format!(
                "log level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if self.logging.log_dir.as_deref() == Some("") {
            return Err(invalid("log_dir cannot be empty when set"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> TelemetryError {
    TelemetryError::Config(toml::de::Error::custom(msg))
}
