//! Pending deltas and persisted day records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DayKey, TrackingKey};

/// Elapsed time awaiting durable persistence.
///
/// Produced when a session ends; owned by the accumulation buffer until a
/// flush hands it to the store writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDelta {
    /// Local calendar day the time is attributed to
    pub day: DayKey,
    /// Page the time was spent on
    pub key: TrackingKey,
    /// Elapsed milliseconds
    pub milliseconds: u64,
}

impl PendingDelta {
    /// Creates a new pending delta.
    pub fn new(day: DayKey, key: TrackingKey, milliseconds: u64) -> Self {
        Self {
            day,
            key,
            milliseconds,
        }
    }
}

/// Accumulated milliseconds per tracking key for one calendar day.
///
/// Values only ever grow: the only mutation is [`DayRecord::add`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayRecord(BTreeMap<TrackingKey, u64>);

impl DayRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds milliseconds to a key, creating the entry if absent.
    pub fn add(&mut self, key: &TrackingKey, milliseconds: u64) {
        let entry = self.0.entry(key.clone()).or_insert(0);
        *entry = entry.saturating_add(milliseconds);
    }

    /// Returns the milliseconds recorded for a key (zero if absent).
    pub fn get(&self, key: &TrackingKey) -> u64 {
        self.0.get(key).copied().unwrap_or(0)
    }

    /// Returns the total milliseconds across all keys.
    pub fn total(&self) -> u64 {
        self.0.values().fold(0u64, |acc, ms| acc.saturating_add(*ms))
    }

    /// Returns the number of keys in the record.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, milliseconds)` in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&TrackingKey, &u64)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize;

    #[test]
    fn test_add_creates_and_accumulates() {
        let key = normalize("https://example.com/a");
        let mut record = DayRecord::new();
        assert_eq!(record.get(&key), 0);

        record.add(&key, 1_000);
        record.add(&key, 2_500);

        assert_eq!(record.get(&key), 3_500);
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn test_total_sums_all_keys() {
        let mut record = DayRecord::new();
        record.add(&normalize("https://a.com/"), 4_000);
        record.add(&normalize("https://b.com/"), 6_000);
        assert_eq!(record.total(), 10_000);
    }

    #[test]
    fn test_add_saturates() {
        let key = normalize("https://example.com/");
        let mut record = DayRecord::new();
        record.add(&key, u64::MAX);
        record.add(&key, 10);
        assert_eq!(record.get(&key), u64::MAX);
    }

    #[test]
    fn test_record_serializes_as_flat_map() {
        let mut record = DayRecord::new();
        record.add(&normalize("https://a.com/page"), 20_000);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"https://a.com/page": 20000}));

        let back: DayRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
