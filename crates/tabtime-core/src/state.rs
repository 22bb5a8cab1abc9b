//! Persisted tracking state records.
//!
//! The store holds, besides one record per day:
//! - the tracking-enabled flag (`TRACKING_FLAG_KEY`)
//! - an optional auto-resume timer (`AUTO_RESUME_KEY`)
//! - bookkeeping from the last retention sweep (`CLEANUP_METADATA_KEY`)

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DayKey;

/// Store key of the tracking-enabled flag.
pub const TRACKING_FLAG_KEY: &str = "is_tracking";

/// Store key of the auto-resume timer record.
pub const AUTO_RESUME_KEY: &str = "auto_resume_timer";

/// Store key of the last retention sweep's metadata.
pub const CLEANUP_METADATA_KEY: &str = "cleanup_metadata";

/// Deferred re-enable of tracking after a user pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResumeTimer {
    /// When tracking should be re-enabled
    pub end_time: DateTime<Utc>,
    /// Whether the timer is armed
    pub active: bool,
}

impl AutoResumeTimer {
    /// Creates an armed timer ending at `end_time`.
    pub fn armed(end_time: DateTime<Utc>) -> Self {
        Self {
            end_time,
            active: true,
        }
    }

    /// Returns true if the timer is armed and its deadline has passed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && self.end_time <= now
    }

    /// Time left until the deadline (zero if already passed).
    pub fn remaining(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.end_time - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }
}

/// Bookkeeping written by every retention sweep.
///
/// Purely observational; nothing reads it back for correctness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupMetadata {
    /// When the sweep ran
    pub timestamp: DateTime<Utc>,
    /// Number of day records deleted
    pub removed_count: usize,
    /// Records dated before this day were deleted
    pub cutoff_date: DayKey,
}

/// Why tracking was switched on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingCause {
    /// Explicit enable request
    Enabled,
    /// Explicit disable request
    Disabled,
    /// The auto-resume timer fired
    AutoResumed,
}

impl fmt::Display for TrackingCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::AutoResumed => write!(f, "auto-resumed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_timer_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let timer = AutoResumeTimer::armed(now + Duration::minutes(5));

        assert!(!timer.is_due(now));
        assert!(timer.is_due(now + Duration::minutes(5)));
        assert_eq!(timer.remaining(now), std::time::Duration::from_secs(300));
        assert_eq!(timer.remaining(now + Duration::hours(1)), std::time::Duration::ZERO);
    }

    #[test]
    fn test_inactive_timer_never_due() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let timer = AutoResumeTimer {
            end_time: now - Duration::minutes(1),
            active: false,
        };
        assert!(!timer.is_due(now));
    }

    #[test]
    fn test_cleanup_metadata_json_shape() {
        let meta = CleanupMetadata {
            timestamp: Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).unwrap(),
            removed_count: 12,
            cutoff_date: DayKey::from_ymd(2024, 2, 1).unwrap(),
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["removed_count"], 12);
        assert_eq!(json["cutoff_date"], "2024-02-01");
    }

    #[test]
    fn test_tracking_cause_serde() {
        let json = serde_json::to_string(&TrackingCause::AutoResumed).unwrap();
        assert_eq!(json, "\"auto_resumed\"");
        assert_eq!(TrackingCause::AutoResumed.to_string(), "auto-resumed");
    }
}
