//! # Telemetry Record Types and Wire Constants
//!
//! Core definitions for the newline-delimited ASCII telemetry format.
//!
//! A record line looks like:
//!
//! ```text
//! SW:01|MODE:2/3|CH:3|A0:512;2.50V|A1:10;0.05V|UMJ:55|OK:01
//! ```
//!
//! Only the `SW:` header is mandatory. Every other field is optional and may
//! appear in any order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::FieldError;

/// Mandatory record header prefix
pub const HEADER_PREFIX: &str = "SW:";

/// Separator between fields of one record
pub const FIELD_SEPARATOR: char = '|';

/// Mode field prefix (`MODE:<token>`)
pub const MODE_PREFIX: &str = "MODE:";

/// Selected channel field prefix (`CH:<int>`)
pub const SELECTED_CHANNEL_PREFIX: &str = "CH:";

/// Voting result value prefix (`UMJ:<float>`)
pub const RESULT_VALUE_PREFIX: &str = "UMJ:";

/// Voting outcome prefix (`OK:<digits>`)
pub const OUTCOME_PREFIX: &str = "OK:";

/// Channel reading prefix (`A<channel>:<raw>;<voltage>V`)
pub const READING_PREFIX: char = 'A';

/// Separator between raw and voltage in a reading
pub const READING_SEPARATOR: char = ';';

/// Unit suffix on the voltage of a reading
pub const VOLTAGE_SUFFIX: char = 'V';

/// Mode token that turns on averaging
pub const AVERAGING_MODE: &str = "AVG";

/// Outcome value meaning "no channels matched"
pub const NO_MATCH: &str = "0";

/// Number of switch state digits in the header
pub const SWITCH_COUNT: usize = 2;

/// Switch states as reported by the header, already corrected for polarity
pub type SwitchBits = [bool; SWITCH_COUNT];

/// Record variant emitted by the firmware
///
/// Both variants share the grammar. They differ in switch polarity, channel
/// count, display labeling and whether mode/voting fields appear at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// Switch monitor: 8 channels, `1` means ON
    #[default]
    #[serde(alias = "a", alias = "switch")]
    A,
    /// Voting monitor: 6 channels labeled from A2, `0` means ON (pull-ups)
    #[serde(alias = "b", alias = "voting")]
    B,
}

impl Variant {
    pub fn default_polarity(self) -> Polarity {
        match self {
            Variant::A => Polarity::ActiveHigh,
            Variant::B => Polarity::ActiveLow,
        }
    }

    pub fn default_num_channels(self) -> usize {
        match self {
            Variant::A => 8,
            Variant::B => 6,
        }
    }

    /// Offset added to a channel index to form its display label
    pub fn default_label_offset(self) -> usize {
        match self {
            Variant::A => 0,
            Variant::B => 2,
        }
    }
}

/// Interpretation of a header state digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// `1` = ON
    ActiveHigh,
    /// `0` = ON
    ActiveLow,
}

impl Polarity {
    /// Decode one header digit, `None` if it is not `0` or `1`
    pub fn decode(self, digit: char) -> Option<bool> {
        let high = match digit {
            '1' => true,
            '0' => false,
            _ => return None,
        };
        Some(match self {
            Polarity::ActiveHigh => high,
            Polarity::ActiveLow => !high,
        })
    }
}

/// Operating mode reported by the voting firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Mode {
    /// `MODE:AVG`
    Averaging,
    /// Any other mode token, e.g. `2/3`
    Named(String),
}

impl Mode {
    pub fn from_token(token: &str) -> Self {
        if token == AVERAGING_MODE {
            Mode::Averaging
        } else {
            Mode::Named(token.to_string())
        }
    }

    pub fn is_averaging(&self) -> bool {
        matches!(self, Mode::Averaging)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Mode::Averaging => AVERAGING_MODE,
            Mode::Named(name) => name,
        }
    }
}

/// One analog sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelReading {
    /// ADC counts
    pub raw: u32,
    /// Volts, as computed by the firmware
    pub voltage: f64,
}

/// Result of a majority vote across channels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VotingOutcome {
    /// False when the firmware reported `OK:0`
    pub success: bool,
    /// Channel indices that agreed, in wire order
    pub matched_channels: Vec<usize>,
    /// `UMJ:` value, when the line carried one
    pub result_value: Option<f64>,
}

impl VotingOutcome {
    pub fn no_match() -> Self {
        Self {
            success: false,
            matched_channels: Vec::new(),
            result_value: None,
        }
    }
}

/// One decoded line
///
/// Optional fields are `None` when the line did not carry them, so the store
/// can tell "absent" apart from "reset".
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryRecord {
    pub switch_bits: SwitchBits,
    pub mode: Option<Mode>,
    /// Stored as sent, range is checked by the store
    pub selected_channel: Option<i64>,
    pub readings: BTreeMap<usize, ChannelReading>,
    pub voting_outcome: Option<VotingOutcome>,
    /// Fields that were dropped while decoding this line
    pub field_errors: Vec<FieldError>,
}

impl TelemetryRecord {
    pub fn new(switch_bits: SwitchBits) -> Self {
        Self {
            switch_bits,
            mode: None,
            selected_channel: None,
            readings: BTreeMap::new(),
            voting_outcome: None,
            field_errors: Vec::new(),
        }
    }

    pub fn is_averaging(&self) -> bool {
        self.mode.as_ref().is_some_and(Mode::is_averaging)
    }
}
