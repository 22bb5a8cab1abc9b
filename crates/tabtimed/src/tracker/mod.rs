//! Tracking pipeline using the actor pattern.
//!
//! The tracker is the single owner of "what is the user looking at right
//! now". Platform events, focus reports, timer firings and UI requests all
//! arrive as [`TrackerCommand`]s and are applied in order.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  TrackerCommand  ┌──────────────┐  PendingDelta  ┌───────────────┐
//! │ socket / poll│ ───────────────▶ │ TrackerActor │ ─────────────▶ │ Accumulation  │
//! │ / timers     │   (mpsc)         │ SessionClock │                │ Buffer        │
//! └──────────────┘                  └──────┬───────┘                └───────┬───────┘
//!                                          │ TrackerEvent                   │ drain
//!                                          ▼ (broadcast)                    ▼
//!                                    subscribers                    DurableWriter ──▶ store
//! ```
//!
//! The buffer is drained by a fixed-period ticker, by an early flush when a
//! session ends and the last flush is older than the opportunistic
//! threshold, and on disable, suspend and shutdown.

use std::sync::Arc;
use std::time::Duration;

use tabtime_core::Clock;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::KvStore;
use crate::writer::DurableWriter;

mod actor;
mod commands;
mod handle;

pub use actor::TrackerActor;
pub use commands::{TrackerCommand, TrackerError, TrackerEvent, TrackingSnapshot};
pub use handle::TrackerHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 32;

/// Flush timing for a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Period of the flush ticker
    pub flush_interval: Duration,
    /// Buffered time this old is flushed when the next session ends
    pub opportunistic_flush: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(15),
            opportunistic_flush: Duration::from_secs(5),
        }
    }
}

/// Spawns the tracker actor and its flush ticker, returning a handle.
///
/// The actor restores the persisted tracking flag and auto-resume timer
/// before processing its first command. Both tasks stop when `cancel_token`
/// is cancelled; call [`TrackerHandle::shutdown`] first to flush.
pub fn spawn_tracker(
    settings: TrackerSettings,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    cancel_token: CancellationToken,
) -> TrackerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let writer = Arc::new(DurableWriter::new(Arc::clone(&store)));

    let actor = TrackerActor::new(
        cmd_rx,
        cmd_tx.downgrade(),
        clock,
        Arc::clone(&store),
        Arc::clone(&writer),
        settings.opportunistic_flush,
        event_tx.clone(),
        cancel_token.clone(),
    );
    tokio::spawn(actor.run());

    let handle = TrackerHandle::new(cmd_tx, event_tx, writer, store);
    spawn_flush_ticker(handle.clone(), settings.flush_interval, cancel_token);

    handle
}

/// Spawns the periodic flush task.
fn spawn_flush_ticker(
    handle: TrackerHandle,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Flush ticker started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("Flush ticker stopping");
                    break;
                }

                _ = ticker.tick() => {
                    match handle.flush().await {
                        Ok(_) => {}
                        Err(TrackerError::ChannelClosed) => {
                            debug!("Flush ticker stopping: tracker channel closed");
                            break;
                        }
                        // Deltas were requeued; the next tick retries
                        Err(e) => warn!(error = %e, "Periodic flush failed"),
                    }
                }
            }
        }
    })
}
