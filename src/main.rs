//! # Serial Telemetry
//!
//! Headless live view of a telemetry microcontroller.
//!
//! Connects to the configured serial port (or the first candidate that opens),
//! decodes the line stream in the background and prints one JSON frame per
//! refresh tick to stdout.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use serial_telemetry::config::{Config, LoggingConfig};
use serial_telemetry::protocol::record::{SwitchBits, VotingOutcome};
use serial_telemetry::serial::{ConnectionStatus, SerialSession, SessionOptions};
use serial_telemetry::telemetry::{DecodeStats, SharedStore, TelemetrySnapshot, TelemetryStore};

/// Config file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Prefix of the rolling log files
const LOG_FILE_PREFIX: &str = "serial-telemetry.log";

/// One line of output per refresh tick
#[derive(Debug, Serialize)]
struct DisplayFrame<'a> {
    status: &'a ConnectionStatus,
    switches: SwitchBits,
    mode: Option<&'a str>,
    averaging: bool,
    selected_channel: Option<i64>,
    selected_channel_in_range: Option<bool>,
    voting: Option<&'a VotingOutcome>,
    elapsed: Option<f64>,
    channels: Vec<ChannelValue<'a>>,
    stats: DecodeStats,
}

#[derive(Debug, Serialize)]
struct ChannelValue<'a> {
    label: &'a str,
    raw: Option<u32>,
    voltage: Option<f64>,
    samples: usize,
}

impl<'a> DisplayFrame<'a> {
    fn new(status: &'a ConnectionStatus, snapshot: &'a TelemetrySnapshot) -> Self {
        Self {
            status,
            switches: snapshot.switch_state,
            mode: snapshot.mode.as_ref().map(|m| m.as_str()),
            averaging: snapshot.is_averaging(),
            selected_channel: snapshot.selected_channel,
            selected_channel_in_range: snapshot.selected_channel_in_range,
            voting: snapshot.voting_outcome.as_ref(),
            elapsed: snapshot.last_timestamp,
            channels: snapshot
                .channels
                .iter()
                .map(|series| ChannelValue {
                    label: &series.label,
                    raw: series.latest.map(|r| r.raw),
                    voltage: series.latest.map(|r| r.voltage),
                    samples: series.len(),
                })
                .collect(),
            stats: snapshot.stats,
        }
    }
}

/// Load the config named on the command line, or the default file if present
fn load_config(arg: Option<String>) -> Result<Config> {
    match arg {
        Some(path) => {
            Config::load(&path).with_context(|| format!("Failed to load config from {}", path))
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => Config::load(DEFAULT_CONFIG_PATH)
            .with_context(|| format!("Failed to load config from {}", DEFAULT_CONFIG_PATH)),
        None => Ok(Config::default()),
    }
}

/// Set up stderr logging and, if configured, a daily log file
///
/// The returned guard flushes the file writer and must live until exit.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter());

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Main entry point
///
/// # Control Flow
///
/// 1. Load configuration and initialize logging
/// 2. Open the serial port (fixed port or auto-detect)
/// 3. Print a JSON frame every `refresh_interval_ms` until Ctrl+C
/// 4. Stop the reader and close the port
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug cargo run --release -- config/default.toml
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config(std::env::args().nth(1))?;
    let _log_guard = init_logging(&config.logging);

    info!("Serial Telemetry v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Decoder variant {:?}: {} channels, polarity {:?}",
        config.decoder.variant,
        config.decoder.num_channels(),
        config.decoder.polarity()
    );

    let store = SharedStore::new(
        TelemetryStore::new(config.decoder.num_channels(), config.store.history_size)
            .with_label_offset(config.decoder.channel_label_offset()),
    );
    let mut session = SerialSession::new(store.clone(), SessionOptions::from_config(&config));

    if config.serial.auto_detect {
        let port = session
            .connect_first(&config.serial.candidates, config.serial.baud_rate)
            .await?;
        info!("Auto-detected telemetry device at {}", port);
    } else {
        session
            .connect(&config.serial.port, config.serial.baud_rate)
            .await?;
    }

    let mut refresh = interval(Duration::from_millis(config.display.refresh_interval_ms));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Press Ctrl+C to exit");

    loop {
        tokio::select! {
            _ = refresh.tick() => {
                let status = session.status();
                let snapshot = store.snapshot();
                match serde_json::to_string(&DisplayFrame::new(&status, &snapshot)) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize frame: {}", e),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    session.disconnect().await;
    let stats = store.stats();
    info!(
        "Applied {} lines ({} field, {} header, {} framing errors)",
        stats.lines_applied, stats.field_errors, stats.header_errors, stats.framing_errors
    );

    Ok(())
}
