//! # Active Hours
//!
//! Parses the `display.active_time` setting (`daily|weekdays|weekend:HHMM-HHMM`)
//! and answers whether a UK wall-clock instant falls inside it. Outside the
//! window the render loop puts the display to sleep.

use chrono::{Datelike, Duration, NaiveDateTime};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which days an active window recurs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Days {
    Daily,
    /// Monday to Friday
    Weekdays,
    /// Saturday and Sunday
    Weekend,
}

impl Days {
    /// Whether `weekday` (ISO numbering, Monday = 1 … Sunday = 7) belongs to this class.
    fn contains(self, weekday: u32) -> bool {
        match self {
            Days::Daily => true,
            Days::Weekdays => (1..=5).contains(&weekday),
            Days::Weekend => (6..=7).contains(&weekday),
        }
    }
}

/// Rejected `active_time` strings.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("failed to parse active time {value:?}: expected daily|weekdays|weekend:HHMM-HHMM")]
pub struct ParseActiveTimeError {
    value: String,
}

/// A recurring time-of-day window, e.g. `weekdays:0700-2300`.
///
/// Start and end are kept as raw `HHMM` numbers. They are not range checked:
/// `2400` simply means midnight at the end of the day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ActiveTime {
    days: Days,
    start_hhmm: u32,
    end_hhmm: u32,
}

impl ActiveTime {
    pub fn new(days: Days, start_hhmm: u32, end_hhmm: u32) -> Self {
        Self {
            days,
            start_hhmm,
            end_hhmm,
        }
    }

    pub fn days(&self) -> Days {
        self.days
    }

    /// Whether `now` (UK wall time) is inside the window, both ends inclusive.
    ///
    /// # Example
    /// ```
    /// use chrono::NaiveDate;
    /// use train_display_lib::time_range::ActiveTime;
    ///
    /// let window: ActiveTime = "weekdays:0900-1700".parse().unwrap();
    /// // 2025-06-03 is a Tuesday
    /// let now = NaiveDate::from_ymd_opt(2025, 6, 3).unwrap().and_hms_opt(10, 0, 0).unwrap();
    /// assert!(window.in_range(now));
    /// ```
    pub fn in_range(&self, now: NaiveDateTime) -> bool {
        if !self.days.contains(now.weekday().number_from_monday()) {
            return false;
        }

        let midnight = now.date().and_time(chrono::NaiveTime::MIN);
        let start = midnight + hhmm_offset(self.start_hhmm);
        let end = midnight + hhmm_offset(self.end_hhmm);
        start <= now && now <= end
    }
}

/// Offset from midnight for an `HHMM` number, normalising out-of-range parts.
fn hhmm_offset(hhmm: u32) -> Duration {
    Duration::hours(i64::from(hhmm / 100)) + Duration::minutes(i64::from(hhmm % 100))
}

impl FromStr for ActiveTime {
    type Err = ParseActiveTimeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let error = || ParseActiveTimeError {
            value: value.to_string(),
        };

        let (days, range) = value.split_once(':').ok_or_else(error)?;
        let days = match days.to_ascii_lowercase().as_str() {
            "daily" => Days::Daily,
            "weekdays" => Days::Weekdays,
            "weekend" => Days::Weekend,
            _ => return Err(error()),
        };

        let (start, end) = range.split_once('-').ok_or_else(error)?;
        let parse = |digits: &str| -> Option<u32> {
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()
        };

        Ok(ActiveTime {
            days,
            start_hhmm: parse(start).ok_or_else(error)?,
            end_hhmm: parse(end).ok_or_else(error)?,
        })
    }
}

impl TryFrom<String> for ActiveTime {
    type Error = ParseActiveTimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for ActiveTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days = match self.days {
            Days::Daily => "daily",
            Days::Weekdays => "weekdays",
            Days::Weekend => "weekend",
        };
        write!(f, "{}:{:04}-{:04}", days, self.start_hhmm, self.end_hhmm)
    }
}
