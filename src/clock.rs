//! # Wall-Clock Time
//!
//! The device clock runs in UTC (set by NTP). Everything shown on screen and every
//! comparison against the timetable happens in UK wall time, which is UTC plus one
//! hour during British Summer Time.
//!
//! BST runs from 01:00 UTC on the last Sunday of March to 01:00 UTC on the last
//! Sunday of October. Both Sundays come from a closed-form day-of-week formula
//! rather than a calendar lookup, and both the departure filter and the screen
//! sleep schedule depend on the result, so it must stay exactly as written.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// Source of the current instant.
///
/// Injected wherever "now" matters so tests can pin the time.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Current UK wall time.
    fn local_now(&self) -> NaiveDateTime {
        uk_time(self.now_utc())
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_utc(&self) -> DateTime<Utc> {
        (**self).now_utc()
    }
}

/// The system clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Start and end (both 01:00 UTC) of British Summer Time in `year`.
///
/// `31 - ((5y/4 + 4) mod 7)` is the last Sunday of March and
/// `31 - ((5y/4 + 1) mod 7)` the last Sunday of October, valid for 1900..=2099.
pub fn bst_window(year: i32) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let base = (5 * year).div_euclid(4);
    let march_day = 31 - (base + 4).rem_euclid(7);
    let october_day = 31 - (base + 1).rem_euclid(7);

    let start = NaiveDate::from_ymd_opt(year, 3, march_day as u32)?.and_hms_opt(1, 0, 0)?;
    let end = NaiveDate::from_ymd_opt(year, 10, october_day as u32)?.and_hms_opt(1, 0, 0)?;
    Some((start, end))
}

/// Convert a UTC instant to UK wall time.
///
/// The window is half-open: the switch instant in March is already summer time,
/// the switch instant in October is already back on GMT.
pub fn uk_time(now: DateTime<Utc>) -> NaiveDateTime {
    let utc = now.naive_utc();
    match bst_window(now.year()) {
        Some((start, end)) if utc >= start && utc < end => utc + Duration::hours(1),
        _ => utc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Timelike};

    #[test]
    fn bst_window_lands_on_last_sundays() {
        let (start, end) = bst_window(2024).unwrap();
        assert_eq!(start.date(), NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
        assert_eq!(end.date(), NaiveDate::from_ymd_opt(2024, 10, 27).unwrap());

        let (start, end) = bst_window(2025).unwrap();
        assert_eq!(start.date(), NaiveDate::from_ymd_opt(2025, 3, 30).unwrap());
        assert_eq!(end.date(), NaiveDate::from_ymd_opt(2025, 10, 26).unwrap());

        let (start, end) = bst_window(2026).unwrap();
        assert_eq!(start.date(), NaiveDate::from_ymd_opt(2026, 3, 29).unwrap());
        assert_eq!(end.date(), NaiveDate::from_ymd_opt(2026, 10, 25).unwrap());
        assert_eq!(start.hour(), 1);
    }

    #[test]
    fn winter_time_is_utc() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 30, 0).unwrap();
        assert_eq!(uk_time(now), now.naive_utc());
    }

    #[test]
    fn summer_time_adds_an_hour() {
        let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 30, 0).unwrap();
        assert_eq!(uk_time(now).hour(), 13);
    }

    #[test]
    fn switch_instants_are_half_open() {
        let spring = Utc.with_ymd_and_hms(2025, 3, 30, 1, 0, 0).unwrap();
        assert_eq!(uk_time(spring).hour(), 2);
        let just_before = spring - Duration::seconds(1);
        assert_eq!(uk_time(just_before).hour(), 0);

        let autumn = Utc.with_ymd_and_hms(2025, 10, 26, 1, 0, 0).unwrap();
        assert_eq!(uk_time(autumn).hour(), 1);
        let just_before = autumn - Duration::seconds(1);
        assert_eq!(uk_time(just_before).hour(), 1);
        assert_eq!(uk_time(just_before).minute(), 59);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_utc(), start);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now_utc(), start + Duration::minutes(5));
    }
}
