//! The session clock: the single open observation of a foreground page.
//!
//! # State Machine
//!
//! ```text
//!            valid target                 target change / tab close /
//!   ┌──────┐ ─────────────▶ ┌────────┐    focus lost / shutdown
//!   │ Idle │                │ Active │ ──────────────────────────▶ Idle (+ delta)
//!   └──────┘ ◀───────────── └────────┘
//!      ▲ invalid target:       │ same key on same tab: no-op
//!      └── no-op               └──────────────────────────┘
//! ```
//!
//! The clock always finishes the current session before opening a new one,
//! so no instant is ever attributed to more than one key.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{is_trackable, normalize, DayKey, PendingDelta, TrackingKey};

/// Sessions shorter than this are dropped as drive-by navigation.
pub const MIN_VISIT_DURATION: Duration = Duration::from_secs(3);

/// Browser tab identifier as reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(i64);

impl TabId {
    /// Creates a tab ID.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The currently open, unfinalized observation of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: TrackingKey,
    pub tab_id: TabId,
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Time spent in this session up to `now`.
    ///
    /// A clock that stepped backwards yields zero rather than a negative span.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Finalizes the session into a delta attributed to the day of `now`.
    ///
    /// Returns `None` when the session was shorter than [`MIN_VISIT_DURATION`].
    pub fn finish(self, now: DateTime<Utc>) -> Option<PendingDelta> {
        let elapsed = self.elapsed(now);
        if elapsed < MIN_VISIT_DURATION {
            debug!(
                key = %self.key,
                elapsed_ms = elapsed.as_millis() as u64,
                "Session below minimum duration, dropped"
            );
            return None;
        }

        let milliseconds = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        Some(PendingDelta::new(
            DayKey::from_instant(now),
            self.key,
            milliseconds,
        ))
    }
}

/// Owner of the single active session.
#[derive(Debug, Default)]
pub struct SessionClock {
    current: Option<Session>,
}

impl SessionClock {
    /// Creates an idle clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the active session, if any.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Returns true if a session is open.
    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Points the clock at a new foreground target.
    ///
    /// `None`, or an address that is not trackable, ends the current session
    /// without opening another. The same key on the same tab is a no-op.
    /// Returns the delta of the session that ended, if it qualified.
    pub fn observe(&mut self, target: Option<(TabId, &str)>, now: DateTime<Utc>) -> Option<PendingDelta> {
        let Some((tab_id, raw)) = target.filter(|(_, raw)| is_trackable(raw)) else {
            return self.end(now);
        };

        let key = normalize(raw);

        if let Some(current) = &self.current {
            if current.tab_id == tab_id && current.key == key {
                return None;
            }
        }

        let delta = self.end(now);

        debug!(key = %key, tab_id = %tab_id, "Session started");
        self.current = Some(Session {
            key,
            tab_id,
            started_at: now,
        });

        delta
    }

    /// Ends the active session, if any.
    pub fn end(&mut self, now: DateTime<Utc>) -> Option<PendingDelta> {
        let session = self.current.take()?;
        debug!(key = %session.key, tab_id = %session.tab_id, "Session ended");
        session.finish(now)
    }

    /// Ends the active session only if it belongs to the given tab.
    pub fn end_for_tab(&mut self, tab_id: TabId, now: DateTime<Utc>) -> Option<PendingDelta> {
        match &self.current {
            Some(session) if session.tab_id == tab_id => self.end(now),
            _ => None,
        }
    }
}
