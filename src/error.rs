//! # Error Types
//!
//! Custom error types for the telemetry decoder using `thiserror`.
//!
//! Only [`TelemetryError`] and [`ConnectError`] ever reach a caller. The
//! framing, header and field errors are diagnostics: they are logged and
//! counted, and the stream keeps flowing.

use thiserror::Error;

/// Main error type for the telemetry crate
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial connection errors
    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),
}

/// Failure to open a serial port, surfaced synchronously from `connect()`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectError {
    /// The port exists in the request but could not be opened
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// None of the candidate paths could be opened
    #[error("No serial device found (tried: {0})")]
    NotFound(String),
}

/// A partial line grew past the configured length cap without a newline
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("line exceeded {limit} bytes without a newline")]
    Overflow { limit: usize },
}

/// The mandatory `SW:` header was too short to hold both switch digits
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("switch header too short: {0:?}")]
    TooShort(String),
}

/// One optional field could not be decoded; the rest of the line is kept
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("switch header has non-binary state: {0:?}")]
    InvalidSwitchState(String),

    #[error("malformed channel reading {0:?}")]
    MalformedReading(String),

    #[error("channel {channel} out of range (0..{num_channels})")]
    ChannelOutOfRange { channel: usize, num_channels: usize },

    #[error("invalid selected channel {0:?}")]
    InvalidSelectedChannel(String),

    #[error("invalid voting result value {0:?}")]
    InvalidResultValue(String),

    #[error("invalid matched channel list {0:?}")]
    InvalidMatchList(String),

    #[error("empty value in field {0:?}")]
    EmptyValue(String),

    #[error("voting result value {0} without an OK field")]
    OrphanResultValue(String),
}

/// Result type alias for the telemetry crate
pub type Result<T> = std::result::Result<T, TelemetryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_converts() {
        let err: TelemetryError = ConnectError::NotFound("/dev/ttyACM0".to_string()).into();
        assert!(matches!(err, TelemetryError::Connect(_)));
        assert!(err.to_string().contains("/dev/ttyACM0"));
    }

    #[test]
    fn test_framing_error_message() {
        let err = FramingError::Overflow { limit: 16 };
        assert_eq!(err.to_string(), "line exceeded 16 bytes without a newline");
    }
}
