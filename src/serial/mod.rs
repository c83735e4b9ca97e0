//! # Serial Communication Module
//!
//! Handles the serial link to the telemetry microcontroller.
//!
//! This module handles:
//! - Opening the port and waiting out the board's reset-on-open
//! - A background reader task polling the port and decoding lines
//! - Handing decoded batches to a single store-applier task
//! - Backoff on read errors and a connection status for the display
//! - Stopping and joining the reader before any reconnect

pub mod backoff;
pub mod port_trait;

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::ConnectError;
use crate::protocol::decoder::{DecodedBatch, StreamDecoder};
use crate::protocol::parser::RecordParser;
use crate::telemetry::{SharedStore, TelemetrySnapshot};
use backoff::retry_delay;
use port_trait::{BoxedTransport, PortOpener, TokioSerialOpener};

/// Device paths tried by [`SerialSession::connect_first`] (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // Native USB boards (Leonardo, Due, RP2040)
    "/dev/ttyUSB0", // USB-to-serial adapters (CH340, FTDI)
];

/// Bytes pulled from the port per read
const READ_BUFFER_SIZE: usize = 1024;

/// Connection state as seen by the display layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected { port: String },
    /// Reads are failing; the reader is backing off
    Retrying { port: String, attempt: u32, error: String },
    /// The last connect attempt failed
    Failed { error: String },
}

/// Timing and decoding knobs for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub parser: RecordParser,
    pub max_line_length: Option<usize>,
    /// Upper bound on a single read
    pub read_timeout: Duration,
    /// Pause between reads
    pub poll_interval: Duration,
    /// Wait after opening before the first read
    pub settle: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub join_timeout: Duration,
    /// Batches buffered between reader and applier
    pub channel_capacity: usize,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        let serial = &config.serial;
        Self {
            parser: config.decoder.parser(),
            max_line_length: config.decoder.max_line_length(),
            read_timeout: Duration::from_millis(serial.read_timeout_ms),
            poll_interval: Duration::from_millis(serial.poll_interval_ms),
            settle: Duration::from_millis(serial.settle_ms),
            backoff_base: Duration::from_millis(serial.reconnect_interval_ms),
            backoff_max: Duration::from_millis(serial.max_backoff_ms),
            join_timeout: Duration::from_millis(serial.join_timeout_ms),
            channel_capacity: serial.channel_capacity,
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Tasks belonging to one open port
struct ActiveLink {
    port: String,
    stop: watch::Sender<bool>,
    reader: JoinHandle<()>,
    applier: JoinHandle<()>,
}

/// Connect/disconnect lifecycle around one [`SharedStore`]
///
/// The display layer keeps its own clone of the store and polls
/// [`SharedStore::snapshot`]; the session only writes to it.
pub struct SerialSession {
    opener: Arc<dyn PortOpener>,
    options: SessionOptions,
    store: SharedStore,
    status: Arc<RwLock<ConnectionStatus>>,
    active_readers: Arc<AtomicUsize>,
    link: Option<ActiveLink>,
}

impl std::fmt::Debug for SerialSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSession")
            .field("port", &self.port())
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SerialSession {
    /// Create a session using real serial ports
    pub fn new(store: SharedStore, options: SessionOptions) -> Self {
        Self::with_opener(store, options, Arc::new(TokioSerialOpener))
    }

    /// Create a session with a custom port opener
    pub fn with_opener(
        store: SharedStore,
        options: SessionOptions,
        opener: Arc<dyn PortOpener>,
    ) -> Self {
        Self {
            opener,
            options,
            store,
            status: Arc::new(RwLock::new(ConnectionStatus::Disconnected)),
            active_readers: Arc::new(AtomicUsize::new(0)),
            link: None,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.store.snapshot()
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Port of the current connection
    pub fn port(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.port.as_str())
    }

    /// Reader tasks currently running (never more than one)
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst)
    }

    /// Open `port` and start streaming into the store
    ///
    /// An existing connection is fully stopped first, so two readers never
    /// feed the store at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the port cannot be opened. The session is
    /// then disconnected with status [`ConnectionStatus::Failed`].
    pub async fn connect(&mut self, port: &str, baud_rate: u32) -> Result<(), ConnectError> {
        if self.link.is_some() {
            info!("Reconnecting: closing {:?} first", self.port());
            self.disconnect().await;
        }

        let transport = match self.opener.open(port, baud_rate) {
            Ok(transport) => transport,
            Err(e) => {
                warn!("Failed to connect: {}", e);
                *self.status.write() = ConnectionStatus::Failed {
                    error: e.to_string(),
                };
                return Err(e);
            }
        };

        if !self.options.settle.is_zero() {
            debug!("Waiting {:?} for {} to settle", self.options.settle, port);
            tokio::time::sleep(self.options.settle).await;
        }

        *self.status.write() = ConnectionStatus::Connected {
            port: port.to_string(),
        };
        self.start_link(port, transport);
        info!("Connected to {} at {} baud", port, baud_rate);
        Ok(())
    }

    /// Connect to the first candidate path that opens
    ///
    /// # Returns
    ///
    /// The path that was connected.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::NotFound`] listing every path tried.
    pub async fn connect_first<S: AsRef<str>>(
        &mut self,
        candidates: &[S],
        baud_rate: u32,
    ) -> Result<String, ConnectError> {
        for candidate in candidates {
            let path = candidate.as_ref();
            debug!("Trying serial port: {}", path);
            match self.connect(path, baud_rate).await {
                Ok(()) => return Ok(path.to_string()),
                Err(e) => debug!("Skipping {}: {}", path, e),
            }
        }

        let tried = candidates
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(", ");
        let err = ConnectError::NotFound(tried);
        *self.status.write() = ConnectionStatus::Failed {
            error: err.to_string(),
        };
        Err(err)
    }

    /// Stop the reader, drain pending batches into the store and close the port
    ///
    /// Each task gets `join_timeout` to finish before it is aborted.
    pub async fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        // Err only means the reader already exited
        let _ = link.stop.send(true);
        join_with_timeout("reader", link.reader, self.options.join_timeout).await;
        join_with_timeout("applier", link.applier, self.options.join_timeout).await;

        *self.status.write() = ConnectionStatus::Disconnected;
        info!("Disconnected from {}", link.port);
    }

    fn start_link(&mut self, port: &str, transport: BoxedTransport) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (batch_tx, batch_rx) = mpsc::channel(self.options.channel_capacity.max(1));

        let reader = ReaderLoop {
            port: port.to_string(),
            transport,
            decoder: StreamDecoder::new(self.options.parser, self.options.max_line_length),
            options: self.options.clone(),
            status: Arc::clone(&self.status),
            stop: stop_rx,
            batches: batch_tx,
            _guard: ReaderGuard::new(Arc::clone(&self.active_readers)),
        };

        self.link = Some(ActiveLink {
            port: port.to_string(),
            stop: stop_tx,
            reader: tokio::spawn(reader.run()),
            applier: tokio::spawn(apply_batches(batch_rx, self.store.clone())),
        });
    }
}

impl Drop for SerialSession {
    fn drop(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.stop.send(true);
            link.reader.abort();
        }
    }
}

async fn join_with_timeout(name: &str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => debug!("{} task stopped", name),
        Ok(Err(e)) => warn!("{} task ended abnormally: {}", name, e),
        Err(_) => {
            warn!("{} task did not stop within {:?}, aborting", name, timeout);
            handle.abort();
            let _ = tokio::time::timeout(timeout, handle).await;
        }
    }
}

/// Sole writer of the store while a link is up
async fn apply_batches(mut batches: mpsc::Receiver<DecodedBatch>, store: SharedStore) {
    while let Some(batch) = batches.recv().await {
        store.apply_batch(batch);
    }
}

/// Counts live reader tasks for the lifetime of the guard
struct ReaderGuard(Arc<AtomicUsize>);

impl ReaderGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        let previous = counter.fetch_add(1, Ordering::SeqCst);
        if previous != 0 {
            error!("Starting a reader while {} other reader(s) still run", previous);
        }
        Self(counter)
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ReaderLoop {
    port: String,
    transport: BoxedTransport,
    decoder: StreamDecoder,
    options: SessionOptions,
    status: Arc<RwLock<ConnectionStatus>>,
    stop: watch::Receiver<bool>,
    batches: mpsc::Sender<DecodedBatch>,
    _guard: ReaderGuard,
}

impl ReaderLoop {
    async fn run(mut self) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut failures: u32 = 0;

        debug!("Reader for {} started", self.port);

        loop {
            if *self.stop.borrow() {
                break;
            }

            let read = tokio::time::timeout(self.options.read_timeout, self.transport.read(&mut buf)).await;
            if failures > 0 && !matches!(read, Ok(Err(_))) {
                info!("Reads on {} recovered after {} failure(s)", self.port, failures);
                failures = 0;
                *self.status.write() = ConnectionStatus::Connected {
                    port: self.port.clone(),
                };
            }

            match read {
                // Timed out or nothing buffered yet
                Err(_) | Ok(Ok(0)) => {}
                Ok(Ok(n)) => {
                    let batch = self.decoder.decode(&buf[..n]);
                    if !batch.is_empty() && self.batches.send(batch).await.is_err() {
                        debug!("Store applier is gone, stopping reader");
                        break;
                    }
                }
                Ok(Err(e)) => {
                    failures = failures.saturating_add(1);
                    let delay = retry_delay(failures, self.options.backoff_base, self.options.backoff_max);
                    warn!(
                        "Serial read on {} failed (attempt {}): {}; retrying in {:?}",
                        self.port, failures, e, delay
                    );
                    *self.status.write() = ConnectionStatus::Retrying {
                        port: self.port.clone(),
                        attempt: failures,
                        error: e.to_string(),
                    };
                    if self.pause(delay).await {
                        break;
                    }
                    continue;
                }
            }

            if self.pause(self.options.poll_interval).await {
                break;
            }
        }

        debug!("Reader for {} stopped", self.port);
    }

    /// Sleep for `delay`; returns true if a stop was requested meanwhile
    async fn pause(&mut self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            changed = self.stop.changed() => changed.is_err() || *self.stop.borrow(),
        }
    }
}
