//! # Serial Telemetry Library
//!
//! Decode switch, analog and voting telemetry streamed by a microcontroller
//! over a serial link.
//!
//! This library provides the core functionality for turning a raw byte stream
//! of `SW:..|MODE:..|A0:..` lines into bounded per-channel history that a
//! display can poll at its own pace.

pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod telemetry;

pub use error::{Result, TelemetryError};
