//! Retention window policy.
//!
//! The window is expressed in calendar months: with `months = 3` a sweep in
//! May keeps everything from 1 February onward, and everything dated before
//! that is expired.

use chrono::Months;

use crate::DayKey;

/// Months of history kept by default.
pub const DEFAULT_RETENTION_MONTHS: u32 = 3;

/// First day that survives a sweep run on `today`: the first day of the
/// month `months` before the current one.
pub fn retention_cutoff(today: DayKey, months: u32) -> DayKey {
    let first = today.first_of_month();

    first
        .date()
        .checked_sub_months(Months::new(months))
        .map(DayKey::new)
        .unwrap_or(first)
}

/// Returns true if a record for `day` falls outside the window.
pub fn is_expired(day: DayKey, cutoff: DayKey) -> bool {
    day < cutoff
}
