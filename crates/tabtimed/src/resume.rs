//! Auto-resume scheduler: deferred re-enable of tracking after a pause.
//!
//! The deadline is persisted under [`AUTO_RESUME_KEY`] so a restart can pick
//! it up again. The in-memory side is a spawned sleep that reports back to the
//! tracker actor with [`TrackerCommand::AutoResumeFired`]. Every arm bumps a
//! generation counter and the actor only honors a firing whose generation is
//! still current, so a timer that was cancelled or replaced while its message
//! was in flight is ignored.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabtime_core::{AutoResumeTimer, AUTO_RESUME_KEY};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::{self, KvStore};
use crate::tracker::TrackerCommand;

/// Stand-in sleep for deadlines beyond what the timer wheel can represent.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(86_400 * 365 * 30);

/// What [`AutoResumeScheduler::restore`] found in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restored {
    /// No armed timer
    Nothing,
    /// The deadline passed while the daemon was down; fire now
    Due,
    /// Re-armed for the remaining time
    Armed(DateTime<Utc>),
}

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    end_time: DateTime<Utc>,
    cancel: CancellationToken,
}

/// Owner of the single auto-resume timer.
pub struct AutoResumeScheduler {
    store: Arc<dyn KvStore>,
    commands: mpsc::WeakSender<TrackerCommand>,
    generation: u64,
    armed: Option<ArmedTimer>,
}

impl AutoResumeScheduler {
    pub fn new(store: Arc<dyn KvStore>, commands: mpsc::WeakSender<TrackerCommand>) -> Self {
        Self {
            store,
            commands,
            generation: 0,
            armed: None,
        }
    }

    /// Deadline of the armed timer, if any.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.armed.as_ref().map(|t| t.end_time)
    }

    /// Arms the timer for `end_time` and persists it, replacing any earlier one.
    pub async fn start(&mut self, end_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.arm(end_time, now);

        if let Err(e) = store::save(
            self.store.as_ref(),
            AUTO_RESUME_KEY,
            &AutoResumeTimer::armed(end_time),
        )
        .await
        {
            warn!(error = %e, "Failed to persist auto-resume timer");
        }

        info!(end_time = %end_time, "Auto-resume armed");
    }

    /// Disarms the timer and clears the persisted record.
    ///
    /// Safe to call when nothing is armed.
    pub async fn cancel(&mut self) {
        if self.disarm() {
            info!("Auto-resume cancelled");
        }
        self.clear_persisted().await;
    }

    /// Accepts a firing from the timer task.
    ///
    /// Returns true if `generation` matches the armed timer, which is then
    /// considered consumed and its persisted record removed.
    pub async fn accept_fired(&mut self, generation: u64) -> bool {
        let current = self
            .armed
            .as_ref()
            .is_some_and(|timer| timer.generation == generation);
        if !current {
            debug!(generation, "Ignoring stale auto-resume firing");
            return false;
        }

        self.armed = None;
        self.clear_persisted().await;
        true
    }

    /// Reloads a persisted timer after a restart.
    ///
    /// A due timer is cleared and reported as [`Restored::Due`] for the caller
    /// to act on once. A future one is re-armed for the remainder.
    pub async fn restore(&mut self, now: DateTime<Utc>) -> Restored {
        let timer: Option<AutoResumeTimer> =
            match store::load(self.store.as_ref(), AUTO_RESUME_KEY).await {
                Ok(timer) => timer,
                Err(e) => {
                    warn!(error = %e, "Failed to load auto-resume timer");
                    return Restored::Nothing;
                }
            };

        match timer {
            Some(timer) if timer.is_due(now) => {
                info!(end_time = %timer.end_time, "Auto-resume deadline passed while stopped");
                self.clear_persisted().await;
                Restored::Due
            }
            Some(timer) if timer.active => {
                self.arm(timer.end_time, now);
                info!(end_time = %timer.end_time, "Auto-resume re-armed");
                Restored::Armed(timer.end_time)
            }
            Some(_) => {
                self.clear_persisted().await;
                Restored::Nothing
            }
            None => Restored::Nothing,
        }
    }

    /// Stops the in-memory timer without touching the store.
    ///
    /// Returns true if a timer was armed.
    pub fn disarm(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn arm(&mut self, end_time: DateTime<Utc>, now: DateTime<Utc>) {
        self.disarm();
        self.generation += 1;

        let generation = self.generation;
        let cancel = CancellationToken::new();
        let started = tokio::time::Instant::now();
        let deadline = started
            .checked_add(AutoResumeTimer::armed(end_time).remaining(now))
            .unwrap_or_else(|| started + FAR_FUTURE);
        let commands = self.commands.clone();
        let token = cancel.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;

                _ = token.cancelled() => {
                    debug!(generation, "Auto-resume task cancelled");
                }

                _ = tokio::time::sleep_until(deadline) => {
                    let Some(sender) = commands.upgrade() else {
                        debug!("Auto-resume fired after tracker stopped");
                        return;
                    };
                    if sender
                        .send(TrackerCommand::AutoResumeFired { generation })
                        .await
                        .is_err()
                    {
                        debug!("Auto-resume fired after tracker stopped");
                    }
                }
            }
        });

        self.armed = Some(ArmedTimer {
            generation,
            end_time,
            cancel,
        });
    }

    async fn clear_persisted(&self) {
        if let Err(e) = self.store.remove(AUTO_RESUME_KEY).await {
            warn!(error = %e, "Failed to clear auto-resume timer");
        }
    }
}

impl Drop for AutoResumeScheduler {
    fn drop(&mut self) {
        self.disarm();
    }
}
