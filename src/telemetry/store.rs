//! # Telemetry Store
//!
//! Bounded rolling history per channel plus the latest scalar state.
//!
//! The store is plain data. Sharing between the serial reader and the display
//! goes through [`SharedStore`], which holds it behind a `parking_lot` mutex
//! and applies a whole poll's worth of records under one lock.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::snapshot::{ChannelSeries, DecodeStats, TelemetrySnapshot};
use crate::protocol::decoder::DecodedBatch;
use crate::protocol::record::{Mode, SwitchBits, TelemetryRecord, VotingOutcome};

/// Default number of samples kept per buffer
pub const DEFAULT_HISTORY_SIZE: usize = 100;

#[derive(Debug, Clone, Default)]
struct ChannelHistory {
    raw: VecDeque<u32>,
    voltage: VecDeque<f64>,
}

/// Rolling telemetry state for one session
#[derive(Debug)]
pub struct TelemetryStore {
    history_size: usize,
    label_offset: usize,
    start: Instant,
    timestamps: VecDeque<f64>,
    channels: Vec<ChannelHistory>,
    switch_state: SwitchBits,
    mode: Option<Mode>,
    selected_channel: Option<i64>,
    voting_outcome: Option<VotingOutcome>,
    stats: DecodeStats,
}

impl TelemetryStore {
    /// Create an empty store; elapsed time starts now
    ///
    /// A `history_size` of zero is raised to one.
    pub fn new(num_channels: usize, history_size: usize) -> Self {
        let history_size = history_size.max(1);
        Self {
            history_size,
            label_offset: 0,
            start: Instant::now(),
            timestamps: VecDeque::with_capacity(history_size),
            channels: vec![ChannelHistory::default(); num_channels],
            switch_state: SwitchBits::default(),
            mode: None,
            selected_channel: None,
            voting_outcome: None,
            stats: DecodeStats::default(),
        }
    }

    /// Offset added to channel indices when building display labels
    pub fn with_label_offset(mut self, label_offset: usize) -> Self {
        self.label_offset = label_offset;
        self
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub fn timestamps(&self) -> &VecDeque<f64> {
        &self.timestamps
    }

    pub fn switch_state(&self) -> SwitchBits {
        self.switch_state
    }

    /// Apply one decoded record
    ///
    /// Appends a timestamp and one sample per channel present in the record.
    /// Scalars are overwritten only by fields the record actually carried.
    ///
    /// # Returns
    ///
    /// The elapsed seconds assigned to this record.
    pub fn apply(&mut self, record: TelemetryRecord) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        push_bounded(&mut self.timestamps, elapsed, self.history_size);

        for (channel, reading) in record.readings {
            let Some(history) = self.channels.get_mut(channel) else {
                debug!("Ignoring reading for unknown channel {}", channel);
                continue;
            };
            push_bounded(&mut history.raw, reading.raw, self.history_size);
            push_bounded(&mut history.voltage, reading.voltage, self.history_size);
        }

        self.switch_state = record.switch_bits;

        if record.mode.is_some() {
            self.mode = record.mode;
        }

        if let Some(selected) = record.selected_channel {
            if !self.channel_in_range(selected) {
                warn!(
                    "Selected channel {} is outside 0..{}",
                    selected,
                    self.channels.len()
                );
            }
            self.selected_channel = Some(selected);
        }

        if record.voting_outcome.is_some() {
            self.voting_outcome = record.voting_outcome;
        }

        self.stats.lines_applied += 1;
        self.stats.field_errors += record.field_errors.len() as u64;

        elapsed
    }

    /// Apply every record of one reader poll, in order
    pub fn apply_batch(&mut self, batch: DecodedBatch) {
        self.stats.header_errors += batch.header_errors;
        self.stats.framing_errors += batch.framing_errors;
        for record in batch.records {
            self.apply(record);
        }
    }

    /// Drop all history, reset scalars and restart elapsed time at zero
    pub fn clear(&mut self) {
        self.timestamps.clear();
        for history in &mut self.channels {
            history.raw.clear();
            history.voltage.clear();
        }
        self.switch_state = SwitchBits::default();
        self.mode = None;
        self.selected_channel = None;
        self.voting_outcome = None;
        self.stats = DecodeStats::default();
        self.start = Instant::now();
    }

    /// Copy out the current state with every channel series aligned
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let channels = self
            .channels
            .iter()
            .enumerate()
            .map(|(index, history)| {
                ChannelSeries::aligned(
                    index,
                    format!("A{}", index + self.label_offset),
                    self.timestamps.iter(),
                    history.raw.iter(),
                    history.voltage.iter(),
                )
            })
            .collect();

        TelemetrySnapshot {
            switch_state: self.switch_state,
            mode: self.mode.clone(),
            selected_channel: self.selected_channel,
            selected_channel_in_range: self.selected_channel.map(|c| self.channel_in_range(c)),
            voting_outcome: self.voting_outcome.clone(),
            last_timestamp: self.timestamps.back().copied(),
            channels,
            stats: self.stats,
        }
    }

    fn channel_in_range(&self, channel: i64) -> bool {
        usize::try_from(channel).is_ok_and(|c| c < self.channels.len())
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, value: T, capacity: usize) {
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(value);
}

/// Cloneable handle to a store shared between the reader and the display
#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<TelemetryStore>>,
}

impl SharedStore {
    pub fn new(store: TelemetryStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub fn apply(&self, record: TelemetryRecord) -> f64 {
        self.inner.lock().apply(record)
    }

    pub fn apply_batch(&self, batch: DecodedBatch) {
        self.inner.lock().apply_batch(batch);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.lock().snapshot()
    }

    pub fn stats(&self) -> DecodeStats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::record::ChannelReading;
    use std::time::Duration;

    fn record_with(channels: &[(usize, u32, f64)]) -> TelemetryRecord {
        let mut record = TelemetryRecord::new([false, true]);
        for &(channel, raw, voltage) in channels {
            record.readings.insert(channel, ChannelReading { raw, voltage });
        }
        record
    }

    async fn tick() {
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_fifo_bounded() {
        let mut store = TelemetryStore::new(8, 3);

        for i in 0..5u32 {
            store.apply(record_with(&[(0, i, i as f64 / 10.0)]));
            tick().await;
        }

        assert_eq!(store.timestamps().iter().copied().collect::<Vec<_>>(), vec![2.0, 3.0, 4.0]);

        let snapshot = store.snapshot();
        let channel = snapshot.channel(0).unwrap();
        assert_eq!(channel.raw, vec![2, 3, 4]);
        assert_eq!(channel.voltage, vec![0.2, 0.3, 0.4]);
        assert_eq!(channel.timestamps, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_evict_independently() {
        let mut store = TelemetryStore::new(8, 3);

        // Channel 1 appears in every record, channel 2 only in the first two
        for i in 0..5u32 {
            let mut channels = vec![(1, i, 0.0)];
            if i < 2 {
                channels.push((2, 100 + i, 1.0));
            }
            store.apply(record_with(&channels));
            tick().await;
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.channel(1).unwrap().raw, vec![2, 3, 4]);
        assert_eq!(snapshot.channel(2).unwrap().raw, vec![100, 101]);
        assert!(snapshot.channel(3).unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_aligns_short_channel_to_latest_timestamps() {
        let mut store = TelemetryStore::new(8, 100);

        // Channel 2 is missing from the first two of five records
        for i in 0..5u32 {
            let mut channels = vec![(0, i, 0.0)];
            if i >= 2 {
                channels.push((2, i * 10, i as f64));
            }
            store.apply(record_with(&channels));
            tick().await;
        }

        assert_eq!(store.timestamps().len(), 5);

        let snapshot = store.snapshot();
        let channel = snapshot.channel(2).unwrap();
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.timestamps, vec![2.0, 3.0, 4.0]);
        assert_eq!(channel.raw, vec![20, 30, 40]);
        assert_eq!(channel.latest, Some(ChannelReading { raw: 40, voltage: 4.0 }));
        assert_eq!(snapshot.last_timestamp, Some(4.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_fields_keep_previous_scalars() {
        let mut store = TelemetryStore::new(6, 10);

        let mut first = TelemetryRecord::new([true, true]);
        first.mode = Some(Mode::Averaging);
        first.selected_channel = Some(3);
        first.voting_outcome = Some(VotingOutcome::no_match());
        store.apply(first);

        store.apply(TelemetryRecord::new([false, true]));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.switch_state, [false, true]);
        assert!(snapshot.is_averaging());
        assert_eq!(snapshot.selected_channel, Some(3));
        assert_eq!(snapshot.selected_channel_in_range, Some(true));
        assert_eq!(snapshot.voting_outcome, Some(VotingOutcome::no_match()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_fields_overwrite_scalars() {
        let mut store = TelemetryStore::new(6, 10);

        let mut first = TelemetryRecord::new([true, true]);
        first.mode = Some(Mode::Averaging);
        store.apply(first);

        let mut second = TelemetryRecord::new([true, false]);
        second.mode = Some(Mode::Named("2/3".to_string()));
        second.selected_channel = Some(9);
        store.apply(second);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.mode, Some(Mode::Named("2/3".to_string())));
        assert_eq!(snapshot.selected_channel, Some(9));
        assert_eq!(snapshot.selected_channel_in_range, Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_resets_everything() {
        let mut store = TelemetryStore::new(8, 10);

        let mut record = record_with(&[(0, 1, 0.1), (5, 2, 0.2)]);
        record.switch_bits = [true, true];
        record.mode = Some(Mode::Averaging);
        record.voting_outcome = Some(VotingOutcome::no_match());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(store.apply(record), 5.0);

        store.clear();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.switch_state, [false, false]);
        assert!(snapshot.mode.is_none());
        assert!(snapshot.selected_channel.is_none());
        assert!(snapshot.voting_outcome.is_none());
        assert!(snapshot.last_timestamp.is_none());
        assert!(snapshot.channels.iter().all(ChannelSeries::is_empty));
        assert_eq!(snapshot.stats, DecodeStats::default());

        // Elapsed time restarts from the clear
        assert_eq!(store.apply(record_with(&[(0, 1, 0.1)])), 0.0);
        tick().await;
        assert_eq!(store.apply(record_with(&[(0, 1, 0.1)])), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_non_decreasing_in_batch() {
        let mut store = TelemetryStore::new(8, 100);
        store.apply_batch(DecodedBatch {
            records: (0..10).map(|i| record_with(&[(0, i, 0.0)])).collect(),
            header_errors: 2,
            framing_errors: 1,
        });

        let timestamps: Vec<f64> = store.timestamps().iter().copied().collect();
        assert_eq!(timestamps.len(), 10);
        assert!(timestamps.windows(2).all(|w| w[0] <= w[1]));

        let stats = store.stats();
        assert_eq!(stats.lines_applied, 10);
        assert_eq!(stats.header_errors, 2);
        assert_eq!(stats.framing_errors, 1);
    }

    #[test]
    fn test_labels_use_offset() {
        let store = TelemetryStore::new(6, 10).with_label_offset(2);
        let snapshot = store.snapshot();
        let labels: Vec<&str> = snapshot.channels.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["A2", "A3", "A4", "A5", "A6", "A7"]);
    }

    #[test]
    fn test_unknown_channel_reading_is_ignored() {
        let mut store = TelemetryStore::new(2, 10);
        store.apply(record_with(&[(0, 1, 0.1), (7, 2, 0.2)]));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.channels.len(), 2);
        assert_eq!(snapshot.channel(0).unwrap().len(), 1);
    }

    #[test]
    fn test_field_errors_are_counted() {
        let mut store = TelemetryStore::new(8, 10);
        let mut record = TelemetryRecord::new([false, false]);
        record
            .field_errors
            .push(crate::error::FieldError::MalformedReading("A0:x".to_string()));
        store.apply(record);
        assert_eq!(store.stats().field_errors, 1);
    }

    #[test]
    fn test_zero_history_size_is_raised() {
        let mut store = TelemetryStore::new(1, 0);
        assert_eq!(store.history_size(), 1);
        store.apply(record_with(&[(0, 1, 0.1)]));
        store.apply(record_with(&[(0, 2, 0.2)]));
        assert_eq!(store.snapshot().channel(0).unwrap().raw, vec![2]);
    }

    #[test]
    fn test_shared_store_handles_see_same_state() {
        let shared = SharedStore::new(TelemetryStore::new(8, 10));
        let reader_side = shared.clone();

        reader_side.apply(record_with(&[(3, 42, 0.2)]));
        assert_eq!(shared.snapshot().channel(3).unwrap().raw, vec![42]);

        shared.clear();
        assert!(reader_side.snapshot().channel(3).unwrap().is_empty());
    }
}
