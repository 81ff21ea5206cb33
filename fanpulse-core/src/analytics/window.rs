//! Time windows for aggregation queries.
//!
//! Every window is half-open: `start <= ts < end`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// A half-open `[start, end)` time interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Rolling `[now - days, now)`, not aligned to calendar boundaries.
    pub fn last_days(days: u32, now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(i64::from(days)),
            end: now,
        }
    }

    /// The 24 hours starting at `start`.
    pub fn day_from(start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + Duration::days(1),
        }
    }

    /// From UTC midnight of `now`'s day up to `now`.
    pub fn today(now: DateTime<Utc>) -> Self {
        Self {
            start: start_of_day(now),
            end: now,
        }
    }

    /// From the first instant of `now`'s calendar month (UTC) up to `now`.
    pub fn month_to_date(now: DateTime<Utc>) -> Self {
        let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| Utc.from_utc_datetime(&d))
            .unwrap_or_else(|| start_of_day(now));
        Self {
            start: first,
            end: now,
        }
    }

    /// Split at the midpoint into `(first_half, second_half)`.
    pub fn halves(&self) -> (TimeWindow, TimeWindow) {
        let mid = self.start + (self.end - self.start) / 2;
        (
            TimeWindow::new(self.start, mid),
            TimeWindow::new(mid, self.end),
        )
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// UTC midnight of the day containing `ts`.
pub fn start_of_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|d| Utc.from_utc_datetime(&d))
        .unwrap_or(ts)
}
