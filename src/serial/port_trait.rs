//! Trait abstraction for opening serial ports to enable testing

use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::ConnectError;

/// Byte source handed to the reader loop
pub type BoxedTransport = Box<dyn AsyncRead + Send + Unpin>;

/// Opens a transport for a port name and baud rate
#[cfg_attr(test, mockall::automock)]
pub trait PortOpener: Send + Sync {
    /// Open the port, failing synchronously if it cannot be used
    fn open(&self, port: &str, baud_rate: u32) -> Result<BoxedTransport, ConnectError>;
}

/// Real serial ports through `tokio_serial`, 8N1 without flow control
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialOpener;

impl PortOpener for TokioSerialOpener {
    fn open(&self, port: &str, baud_rate: u32) -> Result<BoxedTransport, ConnectError> {
        use tokio_serial::SerialPortBuilderExt;

        debug!("Opening serial port {} at {} baud", port, baud_rate);

        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| ConnectError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Box::new(stream))
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::io;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tokio::io::{DuplexStream, ReadBuf};

    /// Transport that counts how many are alive and can fail its first reads
    pub struct MemoryTransport {
        inner: DuplexStream,
        failures_left: usize,
        live: Arc<AtomicUsize>,
    }

    impl AsyncRead for MemoryTransport {
        fn poll_read(
            self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            let this = self.get_mut();
            if this.failures_left > 0 {
                this.failures_left -= 1;
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Mock read error",
                )));
            }
            Pin::new(&mut this.inner).poll_read(cx, buf)
        }
    }

    impl Drop for MemoryTransport {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Opener handing out in-memory ports; the test keeps the writing ends
    #[derive(Default)]
    pub struct MemoryOpener {
        writers: Mutex<Vec<(String, DuplexStream)>>,
        failures_per_port: usize,
        live: Arc<AtomicUsize>,
        peak: AtomicUsize,
    }

    impl MemoryOpener {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every opened transport fails this many reads before yielding data
        pub fn with_read_failures(failures: usize) -> Self {
            Self {
                failures_per_port: failures,
                ..Self::default()
            }
        }

        /// Take the writing end of the most recently opened port
        pub fn take_writer(&self) -> Option<(String, DuplexStream)> {
            self.writers.lock().pop()
        }

        /// Transports currently alive
        pub fn live(&self) -> usize {
            self.live.load(Ordering::SeqCst)
        }

        /// Most transports ever alive at once
        pub fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl PortOpener for MemoryOpener {
        fn open(&self, port: &str, _baud_rate: u32) -> Result<BoxedTransport, ConnectError> {
            let (writer, reader) = tokio::io::duplex(4096);
            self.writers.lock().push((port.to_string(), writer));

            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);

            Ok(Box::new(MemoryTransport {
                inner: reader,
                failures_left: self.failures_per_port,
                live: Arc::clone(&self.live),
            }))
        }
    }
}
