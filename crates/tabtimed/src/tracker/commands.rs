//! Tracker actor commands, errors, and events.
//!
//! - `TrackerCommand`: messages processed by the `TrackerActor`
//! - `TrackerError`: failures surfaced through the `TrackerHandle`
//! - `TrackerEvent`: notifications broadcast to observers

use std::time::Duration;

use chrono::{DateTime, Utc};
use tabtime_core::{PendingDelta, TabId, TrackingCause, TrackingKey};
use thiserror::Error;
use tokio::sync::oneshot;

use crate::store::StoreError;
use crate::writer::FlushError;

// ============================================================================
// Tracker Commands
// ============================================================================

/// Commands sent to the tracker actor.
///
/// Requests carry a oneshot sender for the reply. Platform events reply with
/// `()` once the event has been applied, so callers can sequence them.
#[derive(Debug)]
pub enum TrackerCommand {
    /// A tab became the foreground tab.
    TabActivated {
        tab_id: TabId,
        url: String,
        respond_to: oneshot::Sender<()>,
    },

    /// A tab navigated to a new address.
    ///
    /// Ignored unless the tab is the foreground tab.
    TabUpdated {
        tab_id: TabId,
        url: String,
        respond_to: oneshot::Sender<()>,
    },

    /// A tab was closed.
    TabClosed {
        tab_id: TabId,
        respond_to: oneshot::Sender<()>,
    },

    /// The host application gained or lost focus.
    FocusObserved {
        focused: bool,
        respond_to: oneshot::Sender<()>,
    },

    /// The host is about to suspend.
    ///
    /// Ends the active session and takes everything buffered once in-flight
    /// early flushes have settled. The caller writes it.
    Suspend {
        respond_to: oneshot::Sender<Vec<PendingDelta>>,
    },

    /// Read the current tracking state.
    GetState {
        respond_to: oneshot::Sender<TrackingSnapshot>,
    },

    /// Turn tracking on. Cancels any pending auto-resume.
    Enable { respond_to: oneshot::Sender<()> },

    /// Turn tracking off, optionally arming an auto-resume.
    Disable {
        auto_resume: Option<Duration>,
        respond_to: oneshot::Sender<()>,
    },

    /// Arm the auto-resume timer directly.
    StartAutoResume {
        after: Duration,
        respond_to: oneshot::Sender<DateTime<Utc>>,
    },

    /// Disarm the auto-resume timer. Idempotent.
    CancelAutoResume { respond_to: oneshot::Sender<()> },

    /// Sent by the auto-resume task when its deadline passes.
    AutoResumeFired { generation: u64 },

    /// Take everything buffered, after in-flight early flushes settle.
    Drain {
        respond_to: oneshot::Sender<Vec<PendingDelta>>,
    },

    /// Put back deltas a flush could not persist.
    Requeue { deltas: Vec<PendingDelta> },

    /// End the active session and take everything buffered.
    Shutdown {
        respond_to: oneshot::Sender<Vec<PendingDelta>>,
    },
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSnapshot {
    pub is_tracking: bool,
    /// Deadline of the armed auto-resume timer
    pub auto_resume_at: Option<DateTime<Utc>>,
    /// Key of the active session
    pub active_key: Option<TrackingKey>,
    /// Milliseconds buffered but not yet persisted
    pub buffered_ms: u64,
}

// ============================================================================
// Tracker Errors
// ============================================================================

/// Errors surfaced by the tracker handle.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// The actor has stopped.
    #[error("tracker channel closed")]
    ChannelClosed,

    /// A flush failed; its deltas were put back in the buffer.
    #[error(transparent)]
    Flush(#[from] FlushError),

    /// A direct store read failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Tracker Events
// ============================================================================

/// Events broadcast to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// Tracking was switched on or off.
    StateChanged {
        is_tracking: bool,
        cause: TrackingCause,
    },
}
