//! Retention sweeper: deletes day records that fell out of the window.
//!
//! Runs once immediately at startup, then every `period`. Only keys that
//! parse as a day are candidates; state records are never touched.

use std::sync::Arc;
use std::time::Duration;

use tabtime_core::{is_expired, retention_cutoff, CleanupMetadata, Clock, DayKey, CLEANUP_METADATA_KEY};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{self, KvStore, StoreError};

/// Deletes expired day records.
pub struct RetentionSweeper {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    months: u32,
}

impl RetentionSweeper {
    /// Creates a sweeper keeping `months` calendar months (current included).
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>, months: u32) -> Self {
        Self {
            store,
            clock,
            months,
        }
    }

    /// Runs one sweep and records its metadata.
    ///
    /// A failed delete stops the sweep; records already deleted stay deleted
    /// and the rest are retried on the next run.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn sweep(&self) -> Result<CleanupMetadata, StoreError> {
        let now = self.clock.now();
        let cutoff = retention_cutoff(DayKey::from_instant(now), self.months);

        let expired: Vec<String> = self
            .store
            .get_all()
            .await?
            .into_keys()
            .filter(|key| DayKey::parse(key).is_ok_and(|day| is_expired(day, cutoff)))
            .collect();

        for key in &expired {
            self.store.remove(key).await?;
            debug!(day = %key, "Expired day record removed");
        }

        let metadata = CleanupMetadata {
            timestamp: now,
            removed_count: expired.len(),
            cutoff_date: cutoff,
        };
        store::save(self.store.as_ref(), CLEANUP_METADATA_KEY, &metadata).await?;

        info!(
            removed = metadata.removed_count,
            cutoff = %cutoff,
            "Retention sweep complete"
        );
        Ok(metadata)
    }
}

/// Spawns the retention task. The first sweep runs immediately.
pub fn spawn_retention_task(
    sweeper: RetentionSweeper,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            months = sweeper.months,
            interval_secs = period.as_secs(),
            "Retention sweeper started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Retention sweeper shutting down");
                    break;
                }

                _ = tick.tick() => {
                    if let Err(e) = sweeper.sweep().await {
                        warn!(error = %e, "Retention sweep failed");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use tabtime_core::{ManualClock, TRACKING_FLAG_KEY};

    use crate::store::MemoryStore;

    fn clock_at(y: i32, m: u32, d: u32) -> ManualClock {
        // Midday keeps the local date equal to the UTC date in any zone
        // within ±11 hours.
        ManualClock::new(Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap())
    }

    async fn seeded_store(keys: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for key in keys {
            store.set(key, json!({"https://a.com/": 1000})).await.unwrap();
        }
        store.set(TRACKING_FLAG_KEY, json!(true)).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sweep_removes_only_before_month_n_back() {
        let store = seeded_store(&[
            "2023-12-31",
            "2024-01-31",
            "2024-02-01",
            "2024-02-15",
            "2024-02-29",
            "2024-03-01",
            "2024-04-15",
            "2024-05-17",
        ])
        .await;
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(clock_at(2024, 5, 17)), 3);

        let metadata = sweeper.sweep().await.unwrap();

        assert_eq!(metadata.removed_count, 2);
        assert_eq!(metadata.cutoff_date, DayKey::from_ymd(2024, 2, 1).unwrap());

        let keys: Vec<String> = store.get_all().await.unwrap().into_keys().collect();
        assert!(!keys.contains(&"2024-01-31".to_string()));
        assert!(keys.contains(&"2024-02-01".to_string()));
        assert!(keys.contains(&"2024-02-15".to_string()));
        assert!(keys.contains(&"2024-02-29".to_string()));
        assert!(keys.contains(&"2024-03-01".to_string()));
        assert!(keys.contains(&"2024-04-15".to_string()));
        assert!(keys.contains(&"2024-05-17".to_string()));
        assert!(keys.contains(&TRACKING_FLAG_KEY.to_string()));
    }

    #[tokio::test]
    async fn test_sweep_writes_metadata() {
        let store = seeded_store(&["2023-01-01"]).await;
        let clock = clock_at(2024, 1, 10);
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(clock.clone()), 3);

        sweeper.sweep().await.unwrap();

        let metadata: CleanupMetadata = store::load(store.as_ref(), CLEANUP_METADATA_KEY)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metadata.timestamp, clock.now());
        assert_eq!(metadata.removed_count, 1);
        assert_eq!(metadata.cutoff_date, DayKey::from_ymd(2023, 10, 1).unwrap());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = seeded_store(&["2020-06-01", "2024-05-01"]).await;
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(clock_at(2024, 5, 2)), 3);

        assert_eq!(sweeper.sweep().await.unwrap().removed_count, 1);
        assert_eq!(sweeper.sweep().await.unwrap().removed_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_sweeps_eagerly_at_startup() {
        let store = seeded_store(&["2020-06-01"]).await;
        let sweeper = RetentionSweeper::new(store.clone(), Arc::new(clock_at(2024, 5, 2)), 3);
        let cancel = CancellationToken::new();

        let task = spawn_retention_task(sweeper, Duration::from_secs(6 * 3600), cancel.clone());
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(store.get("2020-06-01").await.unwrap().is_none());
        assert!(store.get(CLEANUP_METADATA_KEY).await.unwrap().is_some());

        cancel.cancel();
        task.await.unwrap();
    }
}
