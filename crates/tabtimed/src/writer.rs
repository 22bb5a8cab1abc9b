//! Durable store writer: merges buffered deltas into day records.
//!
//! Each flush is a read-modify-write per day. The store has no atomic
//! increment, and a flush yields at every store call, so two flushes touching
//! the same day could otherwise interleave as read/read/write/write and lose
//! one side's increments. Writes to the same day key are serialized by a
//! per-day async mutex; different days proceed independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use tabtime_core::{DayKey, DayRecord, PendingDelta};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::store::{self, KvStore, StoreError};

/// Summary of a successful flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Day records written
    pub days: usize,
    /// Deltas merged
    pub deltas: usize,
    /// Milliseconds added across all records
    pub milliseconds: u64,
}

/// A flush that stopped partway.
///
/// Days merged before the failure are durable; `unwritten` holds exactly
/// the deltas that were not applied, so requeuing them never double counts.
#[derive(Debug, Error)]
#[error("flush failed for {day}: {source}")]
pub struct FlushError {
    pub day: DayKey,
    #[source]
    pub source: StoreError,
    pub unwritten: Vec<PendingDelta>,
}

/// Applies pending deltas to the persisted day records.
pub struct DurableWriter {
    store: Arc<dyn KvStore>,
    day_locks: StdMutex<HashMap<DayKey, Arc<Mutex<()>>>>,
}

impl DurableWriter {
    /// Creates a writer over the shared store.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            day_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Merges every delta into its day record.
    ///
    /// Safe to call concurrently with itself.
    ///
    /// # Errors
    ///
    /// Returns a [`FlushError`] carrying the deltas that were not persisted.
    pub async fn flush(&self, deltas: Vec<PendingDelta>) -> Result<FlushReport, FlushError> {
        let mut by_day: BTreeMap<DayKey, Vec<PendingDelta>> = BTreeMap::new();
        for delta in deltas {
            by_day.entry(delta.day).or_default().push(delta);
        }

        let mut report = FlushReport::default();
        let mut days = by_day.into_iter();

        while let Some((day, group)) = days.next() {
            if let Err(source) = self.merge_day(day, &group).await {
                warn!(day = %day, error = %source, "Day record merge failed");
                let mut unwritten = group;
                unwritten.extend(days.flat_map(|(_, rest)| rest));
                return Err(FlushError {
                    day,
                    source,
                    unwritten,
                });
            }

            report.days += 1;
            report.deltas += group.len();
            report.milliseconds = group
                .iter()
                .fold(report.milliseconds, |acc, d| acc.saturating_add(d.milliseconds));
        }

        Ok(report)
    }

    /// Reads, merges and writes one day record under that day's lock.
    async fn merge_day(&self, day: DayKey, group: &[PendingDelta]) -> Result<(), StoreError> {
        let lock = self.day_lock(day);
        let _guard = lock.lock().await;

        let storage_key = day.storage_key();
        let mut record: DayRecord = store::load(self.store.as_ref(), &storage_key)
            .await?
            .unwrap_or_default();

        for delta in group {
            record.add(&delta.key, delta.milliseconds);
        }

        store::save(self.store.as_ref(), &storage_key, &record).await?;

        debug!(
            day = %day,
            deltas = group.len(),
            keys = record.len(),
            total_ms = record.total(),
            "Day record merged"
        );
        Ok(())
    }

    /// Returns the lock for `day`, dropping locks nobody holds.
    fn day_lock(&self, day: DayKey) -> Arc<Mutex<()>> {
        let mut locks = self
            .day_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|d, lock| *d == day || Arc::strong_count(lock) > 1);
        Arc::clone(locks.entry(day).or_default())
    }
}
