//! Read-only views of the telemetry store handed to the display layer.

use serde::Serialize;

use crate::protocol::record::{ChannelReading, Mode, SwitchBits, VotingOutcome};

/// Counters for everything the decoder saw since the last clear
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecodeStats {
    /// Records applied to the store
    pub lines_applied: u64,
    /// Optional fields dropped inside applied records
    pub field_errors: u64,
    /// `SW:` lines rejected for a broken header
    pub header_errors: u64,
    /// Runaway lines discarded by the assembler
    pub framing_errors: u64,
}

/// Time series of one channel, aligned to the shared timestamps
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSeries {
    pub index: usize,
    /// Display label, e.g. `A2`
    pub label: String,
    pub timestamps: Vec<f64>,
    pub raw: Vec<u32>,
    pub voltage: Vec<f64>,
    /// Most recent reading, if the channel has any history
    pub latest: Option<ChannelReading>,
}

impl ChannelSeries {
    /// Build a series from the full buffers
    ///
    /// Channels absent from some lines have shorter buffers than the shared
    /// timestamps. All three sequences are cut to the last `min(len)` entries
    /// so that index `i` of each refers to the same sample slot.
    pub fn aligned<'a>(
        index: usize,
        label: String,
        timestamps: impl ExactSizeIterator<Item = &'a f64>,
        raw: impl ExactSizeIterator<Item = &'a u32>,
        voltage: impl ExactSizeIterator<Item = &'a f64>,
    ) -> Self {
        let len = timestamps.len().min(raw.len()).min(voltage.len());

        let timestamps: Vec<f64> = suffix(timestamps, len).copied().collect();
        let raw: Vec<u32> = suffix(raw, len).copied().collect();
        let voltage: Vec<f64> = suffix(voltage, len).copied().collect();

        let latest = raw
            .last()
            .zip(voltage.last())
            .map(|(&raw, &voltage)| ChannelReading { raw, voltage });

        Self {
            index,
            label,
            timestamps,
            raw,
            voltage,
            latest,
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

fn suffix<I: ExactSizeIterator>(iter: I, len: usize) -> std::iter::Skip<I> {
    let skip = iter.len() - len;
    iter.skip(skip)
}

/// Consistent copy of the store taken under one lock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub switch_state: SwitchBits,
    pub mode: Option<Mode>,
    pub selected_channel: Option<i64>,
    /// `None` when no channel has been selected yet
    pub selected_channel_in_range: Option<bool>,
    pub voting_outcome: Option<VotingOutcome>,
    /// Elapsed seconds of the newest sample
    pub last_timestamp: Option<f64>,
    pub channels: Vec<ChannelSeries>,
    pub stats: DecodeStats,
}

impl TelemetrySnapshot {
    pub fn is_averaging(&self) -> bool {
        self.mode.as_ref().is_some_and(Mode::is_averaging)
    }

    pub fn channel(&self, index: usize) -> Option<&ChannelSeries> {
        self.channels.get(index)
    }
}
