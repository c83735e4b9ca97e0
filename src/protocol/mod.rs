//! # Telemetry Wire Protocol Module
//!
//! Decoding of the newline-delimited ASCII telemetry stream.
//!
//! This module handles:
//! - Reassembling serial chunks into complete lines
//! - Parsing the `SW:` record grammar for both firmware variants
//! - Per-field validation so one garbled field never costs the whole line
//! - Batching everything decoded from one serial read

pub mod record;
pub mod assembler;
pub mod parser;
pub mod decoder;
