//! # Record Parser
//!
//! Decodes one assembled line into a [`TelemetryRecord`].
//!
//! Only a broken `SW:` header rejects a line. Every other field is decoded on
//! its own: a garbled field is logged, noted on the record and skipped, and
//! the remaining fields still count.

use tracing::{debug, info};

use super::record::*;
use crate::error::{FieldError, HeaderError};

/// Result of parsing one line
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A telemetry record
    Record(TelemetryRecord),
    /// Not a record (boot banner, debug print, blank line, noise)
    Skip,
}

/// Line parser configured for one firmware variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordParser {
    polarity: Polarity,
    num_channels: usize,
}

impl RecordParser {
    /// Create a parser with explicit polarity and channel count
    pub fn new(polarity: Polarity, num_channels: usize) -> Self {
        Self {
            polarity,
            num_channels,
        }
    }

    /// Create a parser with the defaults of a firmware variant
    pub fn for_variant(variant: Variant) -> Self {
        Self::new(variant.default_polarity(), variant.default_num_channels())
    }

    /// Parse one line
    ///
    /// # Returns
    ///
    /// * `Ok(ParseOutcome::Record)` - A record, possibly with dropped fields
    ///   listed in `field_errors`
    /// * `Ok(ParseOutcome::Skip)` - The line is not a record
    ///
    /// # Errors
    ///
    /// Returns [`HeaderError`] if the line starts with `SW:` but the two
    /// switch digits are missing.
    ///
    /// # Examples
    ///
    /// ```
    /// use serial_telemetry::protocol::parser::{ParseOutcome, RecordParser};
    /// use serial_telemetry::protocol::record::Variant;
    ///
    /// let parser = RecordParser::for_variant(Variant::A);
    /// match parser.parse("SW:01|A0:512;2.50V")? {
    ///     ParseOutcome::Record(record) => {
    ///         assert_eq!(record.switch_bits, [false, true]);
    ///         assert_eq!(record.readings[&0].raw, 512);
    ///     }
    ///     ParseOutcome::Skip => unreachable!(),
    /// }
    /// # Ok::<(), serial_telemetry::error::HeaderError>(())
    /// ```
    pub fn parse(&self, line: &str) -> Result<ParseOutcome, HeaderError> {
        let line = line.trim();
        if !line.starts_with(HEADER_PREFIX) {
            if !line.is_empty() {
                debug!("Skipping non-record line: {:?}", line);
            }
            return Ok(ParseOutcome::Skip);
        }

        let mut tokens = line.split(FIELD_SEPARATOR);
        let header = tokens.next().unwrap_or_default();
        let (switch_bits, header_error) = self.parse_header(header)?;
        let mut record = TelemetryRecord::new(switch_bits);
        if let Some(err) = header_error {
            info!("Reading switches in {:?} as OFF: {}", header, err);
            record.field_errors.push(err);
        }
        let mut result_value = None;

        for token in tokens.map(str::trim).filter(|token| !token.is_empty()) {
            if let Err(err) = self.parse_field(token, &mut record, &mut result_value) {
                match err {
                    FieldError::ChannelOutOfRange { .. } => debug!("Dropped field {:?}: {}", token, err),
                    _ => info!("Dropped field {:?}: {}", token, err),
                }
                record.field_errors.push(err);
            }
        }

        if let Some((token, value)) = result_value {
            match record.voting_outcome.as_mut() {
                Some(outcome) => outcome.result_value = Some(value),
                None => {
                    let err = FieldError::OrphanResultValue(token);
                    info!("Dropped field: {}", err);
                    record.field_errors.push(err);
                }
            }
        }

        for (channel, reading) in &record.readings {
            debug!("A{}: {:.2}V (raw {})", channel, reading.voltage, reading.raw);
        }

        Ok(ParseOutcome::Record(record))
    }

    /// Decode the two switch digits
    ///
    /// A digit other than `0`/`1` reads as OFF and is reported back as a
    /// field error; only a header too short for two digits fails the line.
    fn parse_header(&self, header: &str) -> Result<(SwitchBits, Option<FieldError>), HeaderError> {
        let mut digits = header[HEADER_PREFIX.len()..].chars();
        let (Some(first), Some(second)) = (digits.next(), digits.next()) else {
            return Err(HeaderError::TooShort(header.to_string()));
        };

        let (first, second) = (self.polarity.decode(first), self.polarity.decode(second));
        let error = (first.is_none() || second.is_none())
            .then(|| FieldError::InvalidSwitchState(header.to_string()));

        Ok(([first.unwrap_or(false), second.unwrap_or(false)], error))
    }

    fn parse_field(
        &self,
        token: &str,
        record: &mut TelemetryRecord,
        result_value: &mut Option<(String, f64)>,
    ) -> Result<(), FieldError> {
        if let Some(value) = token.strip_prefix(MODE_PREFIX) {
            record.mode = Some(Mode::from_token(non_empty(token, value)?));
        } else if let Some(value) = token.strip_prefix(SELECTED_CHANNEL_PREFIX) {
            let channel = non_empty(token, value)?
                .parse::<i64>()
                .map_err(|_| FieldError::InvalidSelectedChannel(value.to_string()))?;
            record.selected_channel = Some(channel);
        } else if let Some(value) = token.strip_prefix(RESULT_VALUE_PREFIX) {
            let parsed = non_empty(token, value)?
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| FieldError::InvalidResultValue(value.to_string()))?;
            *result_value = Some((value.to_string(), parsed));
        } else if let Some(value) = token.strip_prefix(OUTCOME_PREFIX) {
            record.voting_outcome = Some(parse_outcome(non_empty(token, value)?)?);
        } else if let Some(body) = token.strip_prefix(READING_PREFIX) {
            let (channel, reading) = self.parse_reading(token, body)?;
            record.readings.insert(channel, reading);
        } else {
            debug!("Ignoring unknown field {:?}", token);
        }

        Ok(())
    }

    /// Decode `<channel>:<raw>;<voltage>V` (the part after the `A`)
    fn parse_reading(&self, token: &str, body: &str) -> Result<(usize, ChannelReading), FieldError> {
        let malformed = || FieldError::MalformedReading(token.to_string());

        let (channel, data) = body.split_once(':').ok_or_else(malformed)?;
        let channel = channel.parse::<usize>().map_err(|_| malformed())?;
        if channel >= self.num_channels {
            return Err(FieldError::ChannelOutOfRange {
                channel,
                num_channels: self.num_channels,
            });
        }

        let (raw, voltage) = data.split_once(READING_SEPARATOR).ok_or_else(malformed)?;
        let raw = raw.trim().parse::<u32>().map_err(|_| malformed())?;
        let voltage = voltage
            .trim()
            .strip_suffix(VOLTAGE_SUFFIX)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .ok_or_else(malformed)?;

        Ok((channel, ChannelReading { raw, voltage }))
    }
}

/// Decode the `OK:` value: `0` for no match, otherwise one digit per channel
fn parse_outcome(value: &str) -> Result<VotingOutcome, FieldError> {
    if value == NO_MATCH {
        return Ok(VotingOutcome::no_match());
    }

    let matched_channels = value
        .chars()
        .map(|c| c.to_digit(10).map(|d| d as usize))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| FieldError::InvalidMatchList(value.to_string()))?;

    Ok(VotingOutcome {
        success: true,
        matched_channels,
        result_value: None,
    })
}

fn non_empty<'a>(token: &str, value: &'a str) -> Result<&'a str, FieldError> {
    let value = value.trim();
    if value.is_empty() {
        Err(FieldError::EmptyValue(token.to_string()))
    } else {
        Ok(value)
    }
}
