//! Accumulation buffer for not-yet-durable time.
//!
//! Finished sessions land here first and are merged by `(day, key)`, so a
//! burst of short visits to the same page costs one store write instead of
//! many. The buffer is drained by every flush; deltas from a flush that
//! failed are put back with [`AccumulationBuffer::requeue`].

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tabtime_core::{DayKey, PendingDelta, TrackingKey};

/// In-memory `(day, key) → milliseconds` aggregate.
#[derive(Debug)]
pub struct AccumulationBuffer {
    pending: BTreeMap<(DayKey, TrackingKey), u64>,
    last_drained_at: DateTime<Utc>,
}

impl AccumulationBuffer {
    /// Creates an empty buffer. `now` counts as the last flush.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            pending: BTreeMap::new(),
            last_drained_at: now,
        }
    }

    /// Merges a delta into the buffer.
    pub fn add(&mut self, delta: PendingDelta) {
        let entry = self.pending.entry((delta.day, delta.key)).or_insert(0);
        *entry = entry.saturating_add(delta.milliseconds);
    }

    /// Puts back deltas that could not be persisted.
    ///
    /// Does not reset the flush timestamp.
    pub fn requeue(&mut self, deltas: Vec<PendingDelta>) {
        for delta in deltas {
            self.add(delta);
        }
    }

    /// Empties the buffer and returns its prior contents.
    pub fn drain(&mut self, now: DateTime<Utc>) -> Vec<PendingDelta> {
        self.last_drained_at = now;
        std::mem::take(&mut self.pending)
            .into_iter()
            .map(|((day, key), milliseconds)| PendingDelta::new(day, key, milliseconds))
            .collect()
    }

    /// Copies the contents without draining.
    pub fn pending(&self) -> Vec<PendingDelta> {
        self.pending
            .iter()
            .map(|((day, key), ms)| PendingDelta::new(*day, key.clone(), *ms))
            .collect()
    }

    /// Time since the buffer was last drained.
    pub fn since_last_drain(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_drained_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Number of distinct `(day, key)` entries waiting.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Total milliseconds waiting.
    pub fn pending_ms(&self) -> u64 {
        self.pending
            .values()
            .fold(0u64, |acc, ms| acc.saturating_add(*ms))
    }
}
