//! Time-aligned sliding window of sensor readings for charting.

use std::collections::{BTreeMap, VecDeque};

use auralink_types::SensorKey;
use serde::Serialize;

/// Default number of time slots kept in the window.
pub const DEFAULT_WINDOW_SIZE: usize = 20;

/// One time bucket with a value (or gap) for every sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSlot {
    /// Wall-clock label of the bucket, e.g. "10:00:00".
    pub label: String,
    /// Value per sensor; `None` until that sensor has reported at least once.
    pub values: BTreeMap<SensorKey, Option<f64>>,
}

impl TimeSlot {
    fn empty(label: &str) -> Self {
        Self {
            label: label.to_string(),
            values: SensorKey::ALL.iter().map(|&k| (k, None)).collect(),
        }
    }

    /// Start a new bucket carrying every sensor's last known value forward.
    fn forward_filled(label: &str, previous: Option<&TimeSlot>) -> Self {
        match previous {
            Some(prev) => Self {
                label: label.to_string(),
                values: prev.values.clone(),
            },
            None => Self::empty(label),
        }
    }

    /// Value for a sensor in this bucket.
    pub fn value(&self, key: SensorKey) -> Option<f64> {
        self.values.get(&key).copied().flatten()
    }
}

/// Bounded, time-bucketed store of several sensor series.
///
/// Readings arriving in the same bucket collapse into one slot (the most
/// recent value per sensor wins). A new bucket forward-fills every sensor
/// from the previous slot, so all series always have the same length and
/// slow sensors show their last known value instead of gaps.
#[derive(Debug, Clone)]
pub struct TimeSeriesWindow {
    slots: VecDeque<TimeSlot>,
    capacity: usize,
}

impl Default for TimeSeriesWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl TimeSeriesWindow {
    /// Create an empty window holding at most `capacity` slots.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Record a reading for `key` in the bucket labelled `label`.
    pub fn append(&mut self, key: SensorKey, value: f64, label: &str) {
        let needs_slot = self.slots.back().map_or(true, |last| last.label != label);
        if needs_slot {
            let slot = TimeSlot::forward_filled(label, self.slots.back());
            self.slots.push_back(slot);
        }

        if let Some(slot) = self.slots.back_mut() {
            slot.values.insert(key, Some(value));
        }

        // At most one slot is added per call
        if self.slots.len() > self.capacity {
            self.slots.pop_front();
        }
    }

    /// Maximum number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots from oldest to newest.
    pub fn slots(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter()
    }

    /// Bucket labels from oldest to newest.
    pub fn labels(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.label.clone()).collect()
    }

    /// One sensor's series, aligned with [`labels`](Self::labels).
    pub fn series(&self, key: SensorKey) -> Vec<Option<f64>> {
        self.slots.iter().map(|s| s.value(key)).collect()
    }

    /// Most recent value for a sensor, if it has reported in the window.
    pub fn latest(&self, key: SensorKey) -> Option<f64> {
        self.slots.back().and_then(|s| s.value(key))
    }

    /// Newest slot.
    pub fn last_slot(&self) -> Option<&TimeSlot> {
        self.slots.back()
    }

    /// Drop all history.
    pub fn clear(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SensorKey::*;

    fn label(i: usize) -> String {
        format!("10:00:{:02}", i % 60)
    }

    #[test]
    fn new_window_is_empty() {
        let w = TimeSeriesWindow::default();
        assert!(w.is_empty());
        assert_eq!(w.capacity(), DEFAULT_WINDOW_SIZE);
        assert!(w.latest(Temperature).is_none());
    }

    #[test]
    fn first_append_creates_slot_with_gaps() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 21.5, "10:00:00");

        assert_eq!(w.len(), 1);
        let slot = w.last_slot().unwrap();
        assert_eq!(slot.label, "10:00:00");
        assert_eq!(slot.value(Temperature), Some(21.5));
        assert_eq!(slot.value(Humidity), None);
        assert_eq!(slot.value(AirQuality), None);
    }

    #[test]
    fn same_label_mutates_existing_slot() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 21.5, "10:00:00");
        w.append(Humidity, 60.0, "10:00:00");

        assert_eq!(w.len(), 1);
        let slot = w.last_slot().unwrap();
        assert_eq!(slot.value(Temperature), Some(21.5));
        assert_eq!(slot.value(Humidity), Some(60.0));
        assert_eq!(slot.value(AirQuality), None);
    }

    #[test]
    fn same_label_latest_value_wins() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 21.5, "10:00:00");
        w.append(Temperature, 22.0, "10:00:00");

        assert_eq!(w.len(), 1);
        assert_eq!(w.latest(Temperature), Some(22.0));
    }

    #[test]
    fn new_label_forward_fills_other_sensors() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 21.5, "10:00:00");
        w.append(Humidity, 60.0, "10:00:00");
        w.append(AirQuality, 120.0, "10:00:01");

        assert_eq!(w.len(), 2);
        let slot = w.last_slot().unwrap();
        assert_eq!(slot.value(Temperature), Some(21.5));
        assert_eq!(slot.value(Humidity), Some(60.0));
        assert_eq!(slot.value(AirQuality), Some(120.0));

        // The earlier slot is untouched
        assert_eq!(w.series(AirQuality), vec![None, Some(120.0)]);
    }

    #[test]
    fn forward_fill_overwrites_own_placeholder() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 21.5, "10:00:00");
        w.append(Temperature, 23.0, "10:00:01");

        assert_eq!(w.series(Temperature), vec![Some(21.5), Some(23.0)]);
    }

    #[test]
    fn window_caps_at_capacity_and_evicts_oldest() {
        let mut w = TimeSeriesWindow::default();
        for i in 0..21 {
            w.append(Temperature, i as f64, &label(i));
        }

        assert_eq!(w.len(), 20);
        let labels = w.labels();
        assert!(!labels.contains(&label(0)));
        assert_eq!(labels.first(), Some(&label(1)));
        assert_eq!(labels.last(), Some(&label(20)));
    }

    #[test]
    fn window_never_exceeds_capacity() {
        let mut w = TimeSeriesWindow::new(5);
        for i in 0..200 {
            let key = SensorKey::ALL[i % 3];
            w.append(key, i as f64, &label(i / 2));
            assert!(w.len() <= 5);
        }
    }

    #[test]
    fn series_are_aligned_with_labels() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 20.0, "10:00:00");
        w.append(Humidity, 50.0, "10:00:01");
        w.append(AirQuality, 90.0, "10:00:02");

        let labels = w.labels();
        for key in SensorKey::ALL {
            assert_eq!(w.series(key).len(), labels.len());
        }
        assert_eq!(w.series(Temperature), vec![Some(20.0), Some(20.0), Some(20.0)]);
        assert_eq!(w.series(Humidity), vec![None, Some(50.0), Some(50.0)]);
    }

    #[test]
    fn repeated_label_after_other_label_starts_new_slot() {
        // Labels only compare against the newest slot
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 1.0, "10:00:00");
        w.append(Temperature, 2.0, "10:00:01");
        w.append(Temperature, 3.0, "10:00:00");
        assert_eq!(w.len(), 3);
    }

    #[test]
    fn zero_capacity_keeps_one_slot() {
        let mut w = TimeSeriesWindow::new(0);
        w.append(Temperature, 1.0, "10:00:00");
        w.append(Temperature, 2.0, "10:00:01");
        assert_eq!(w.len(), 1);
        assert_eq!(w.latest(Temperature), Some(2.0));
    }

    #[test]
    fn clear_drops_history() {
        let mut w = TimeSeriesWindow::default();
        w.append(Temperature, 1.0, "10:00:00");
        w.clear();
        assert!(w.is_empty());
    }
}
