//! # Telemetry Module
//!
//! In-memory telemetry state for live display.
//!
//! This module handles:
//! - Applying decoded records to bounded per-channel history
//! - Tracking the latest switch, mode, selection and voting state
//! - Producing aligned snapshots for the display layer
//! - Counting decode failures since the last clear

pub mod snapshot;
pub mod store;

pub use snapshot::{ChannelSeries, DecodeStats, TelemetrySnapshot};
pub use store::{SharedStore, TelemetryStore};
