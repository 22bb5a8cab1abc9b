//! Client interface for the tracker actor.
//!
//! `TrackerHandle` is cheap to clone and shared by the socket server, the
//! flush ticker and the focus poll task. Flushes run on the caller's task:
//! the handle drains the actor's buffer, writes through the shared
//! [`DurableWriter`], and hands back whatever could not be written.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tabtime_core::{DayKey, DayRecord, PendingDelta, TabId};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::commands::{TrackerCommand, TrackerError, TrackerEvent, TrackingSnapshot};
use crate::store::{self, KvStore};
use crate::writer::{DurableWriter, FlushReport};

/// Handle for interacting with the tracker actor.
#[derive(Clone)]
pub struct TrackerHandle {
    sender: mpsc::Sender<TrackerCommand>,
    event_sender: broadcast::Sender<TrackerEvent>,
    writer: Arc<DurableWriter>,
    store: Arc<dyn KvStore>,
}

impl TrackerHandle {
    pub fn new(
        sender: mpsc::Sender<TrackerCommand>,
        event_sender: broadcast::Sender<TrackerEvent>,
        writer: Arc<DurableWriter>,
        store: Arc<dyn KvStore>,
    ) -> Self {
        Self {
            sender,
            event_sender,
            writer,
            store,
        }
    }

    /// Sends a command and waits for its reply.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> TrackerCommand,
    ) -> Result<T, TrackerError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(build(tx))
            .await
            .map_err(|_| TrackerError::ChannelClosed)?;

        rx.await.map_err(|_| TrackerError::ChannelClosed)
    }

    // ========================================================================
    // Platform events
    // ========================================================================

    /// Reports that `tab_id` is now the foreground tab showing `url`.
    pub async fn tab_activated(&self, tab_id: TabId, url: impl Into<String>) -> Result<(), TrackerError> {
        let url = url.into();
        self.request(|respond_to| TrackerCommand::TabActivated {
            tab_id,
            url,
            respond_to,
        })
        .await
    }

    /// Reports that `tab_id` navigated to `url`.
    pub async fn tab_updated(&self, tab_id: TabId, url: impl Into<String>) -> Result<(), TrackerError> {
        let url = url.into();
        self.request(|respond_to| TrackerCommand::TabUpdated {
            tab_id,
            url,
            respond_to,
        })
        .await
    }

    /// Reports that `tab_id` was closed.
    pub async fn tab_closed(&self, tab_id: TabId) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::TabClosed { tab_id, respond_to })
            .await
    }

    /// Reports the host application's focus.
    pub async fn observe_focus(&self, focused: bool) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::FocusObserved {
            focused,
            respond_to,
        })
        .await
    }

    /// Reports that the host is suspending.
    ///
    /// Returns once the active session and everything buffered are in the
    /// store.
    pub async fn suspend(&self) -> Result<FlushReport, TrackerError> {
        let deltas = self
            .request(|respond_to| TrackerCommand::Suspend { respond_to })
            .await?;
        self.write(deltas).await
    }

    // ========================================================================
    // Tracking state
    // ========================================================================

    /// Returns the current tracking state.
    pub async fn state(&self) -> Result<TrackingSnapshot, TrackerError> {
        self.request(|respond_to| TrackerCommand::GetState { respond_to })
            .await
    }

    /// Turns tracking on and cancels any pending auto-resume.
    pub async fn enable(&self) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::Enable { respond_to })
            .await
    }

    /// Turns tracking off and flushes what was buffered.
    ///
    /// With `auto_resume`, tracking comes back on by itself after that long.
    ///
    /// # Errors
    ///
    /// `TrackerError::Flush` if the flush failed. Tracking is off regardless;
    /// the unwritten time stays buffered for the next flush.
    pub async fn disable(&self, auto_resume: Option<Duration>) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::Disable {
            auto_resume,
            respond_to,
        })
        .await?;

        self.flush().await.map(|_| ())
    }

    /// Arms the auto-resume timer. Returns its deadline.
    pub async fn start_auto_resume(&self, after: Duration) -> Result<DateTime<Utc>, TrackerError> {
        self.request(|respond_to| TrackerCommand::StartAutoResume { after, respond_to })
            .await
    }

    /// Disarms the auto-resume timer. Succeeds when none is armed.
    pub async fn cancel_auto_resume(&self) -> Result<(), TrackerError> {
        self.request(|respond_to| TrackerCommand::CancelAutoResume { respond_to })
            .await
    }

    // ========================================================================
    // Durability
    // ========================================================================

    /// Drains the buffer and writes it to the store.
    ///
    /// # Errors
    ///
    /// `TrackerError::Flush` if a day record could not be written; the deltas
    /// not written are requeued before returning.
    pub async fn flush(&self) -> Result<FlushReport, TrackerError> {
        let deltas = self
            .request(|respond_to| TrackerCommand::Drain { respond_to })
            .await?;
        self.write(deltas).await
    }

    /// Ends the active session and flushes everything.
    ///
    /// Call before stopping the daemon.
    pub async fn shutdown(&self) -> Result<FlushReport, TrackerError> {
        info!("Tracker shutting down, flushing");
        let deltas = self
            .request(|respond_to| TrackerCommand::Shutdown { respond_to })
            .await?;
        self.write(deltas).await
    }

    async fn write(&self, deltas: Vec<PendingDelta>) -> Result<FlushReport, TrackerError> {
        if deltas.is_empty() {
            return Ok(FlushReport::default());
        }

        match self.writer.flush(deltas).await {
            Ok(report) => {
                debug!(
                    days = report.days,
                    deltas = report.deltas,
                    milliseconds = report.milliseconds,
                    "Flush complete"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    requeued = e.unwritten.len(),
                    "Flush failed, requeueing"
                );
                // Fire-and-forget: if the actor is gone there is nowhere to put them
                let _ = self
                    .sender
                    .send(TrackerCommand::Requeue {
                        deltas: e.unwritten.clone(),
                    })
                    .await;
                Err(TrackerError::Flush(e))
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads one day's record straight from the store.
    ///
    /// Buffered time not yet flushed is not included.
    pub async fn day_record(&self, day: DayKey) -> Result<DayRecord, TrackerError> {
        let record = store::load(self.store.as_ref(), &day.storage_key()).await?;
        Ok(record.unwrap_or_default())
    }

    /// Subscribes to tracking state changes.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true while the actor is running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
