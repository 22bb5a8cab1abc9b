//! Calendar-day keys for day records.
//!
//! Days are computed in the local time zone. The same conversion is used for
//! attributing a finished session to a day and for the retention cutoff, so
//! the two never disagree about where a day starts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DomainError, DomainResult};

/// Storage format of a day key (ISO date).
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// A calendar date identifying one day record (`YYYY-MM-DD`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Creates a day key from a calendar date.
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Creates a day key from year, month and day.
    ///
    /// Returns `None` for an impossible date.
    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    /// Returns the local calendar day containing the given instant.
    pub fn from_instant(instant: DateTime<Utc>) -> Self {
        Self(instant.with_timezone(&Local).date_naive())
    }

    /// Parses a `YYYY-MM-DD` string.
    pub fn parse(value: &str) -> DomainResult<Self> {
        NaiveDate::parse_from_str(value, DAY_KEY_FORMAT)
            .map(Self)
            .map_err(|_| DomainError::InvalidDay {
                value: value.to_string(),
            })
    }

    /// Returns the key under which this day's record is stored.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }

    /// Returns the underlying date.
    pub fn date(&self) -> NaiveDate {
        self.0
    }

    /// Returns the first day of this day's month.
    pub fn first_of_month(&self) -> Self {
        // Day 1 exists in every month, so the fallback is never taken.
        Self(self.0.with_day(1).unwrap_or(self.0))
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DAY_KEY_FORMAT))
    }
}

impl FromStr for DayKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DayKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
