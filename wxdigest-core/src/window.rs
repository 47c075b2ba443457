//! Inclusive time windows and the date-range shortcuts the CLI exposes.
//!
//! A [`TimeWindow`] stores its bounds in UTC and carries the time zone used to
//! interpret calendar days and to display clock times (`HH:MM`).

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
pub use chrono_tz::Tz;

use crate::error::{Error, Result};

/// Inclusive `[start, end]` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
}

impl TimeWindow {
    /// Create a window, rejecting `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, tz: Tz) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidWindow(format!(
                "start {} is after end {}",
                start.to_rfc3339(),
                end.to_rfc3339()
            )));
        }
        Ok(Self { start, end, tz })
    }

    /// One calendar day, 00:00:00 to 23:59:59 local time.
    pub fn for_date(date: NaiveDate, tz: Tz) -> Result<Self> {
        Self::for_dates(date, date, tz)
    }

    /// From the start of `first` to the end of `last` (both local days).
    pub fn for_dates(first: NaiveDate, last: NaiveDate, tz: Tz) -> Result<Self> {
        let start = local_to_utc(first.and_time(NaiveTime::MIN), tz, true)?;
        let end = local_to_utc(end_of_day(last), tz, false)?;
        Self::new(start, end, tz)
    }

    /// The whole local day containing `now`.
    pub fn today(now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        Self::for_date(now.with_timezone(&tz).date_naive(), tz)
    }

    pub fn yesterday(now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let today = now.with_timezone(&tz).date_naive();
        Self::for_date(today - Duration::days(1), tz)
    }

    /// Monday 00:00 of the current week up to `now`.
    pub fn this_week(now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let today = now.with_timezone(&tz).date_naive();
        let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        let start = local_to_utc(monday.and_time(NaiveTime::MIN), tz, true)?;
        Self::new(start, now, tz)
    }

    /// Midnight `n` days ago up to `now`.
    pub fn last_n_days(n: u32, now: DateTime<Utc>, tz: Tz) -> Result<Self> {
        let today = now.with_timezone(&tz).date_naive();
        let first = today - Duration::days(i64::from(n));
        let start = local_to_utc(first.and_time(NaiveTime::MIN), tz, true)?;
        Self::new(start, now, tz)
    }

    /// A `YYYY-MM-DD` day.
    pub fn specific_date(date: &str, tz: Tz) -> Result<Self> {
        Self::for_date(parse_date(date)?, tz)
    }

    /// `YYYY-MM-DD` to `YYYY-MM-DD`, whole days inclusive.
    pub fn custom(first: &str, last: &str, tz: Tz) -> Result<Self> {
        Self::for_dates(parse_date(first)?, parse_date(last)?, tz)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn local_start(&self) -> DateTime<Tz> {
        self.start.with_timezone(&self.tz)
    }

    pub fn local_end(&self) -> DateTime<Tz> {
        self.end.with_timezone(&self.tz)
    }

    /// Inclusive on both ends.
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts <= self.end
    }

    /// `2024-08-20` for a single day, `2024-08-19 to 2024-08-20` otherwise.
    pub fn format_range(&self) -> String {
        let first = self.local_start().date_naive();
        let last = self.local_end().date_naive();
        if first == last {
            first.format("%Y-%m-%d").to_string()
        } else {
            format!("{} to {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d"))
        }
    }

    /// `2024-08-20 00:00 - 23:59`, with the end date spelled out when it differs.
    pub fn format_bounds(&self) -> String {
        let start = self.local_start();
        let end = self.local_end();
        if start.date_naive() == end.date_naive() {
            format!("{} - {}", start.format("%Y-%m-%d %H:%M"), end.format("%H:%M"))
        } else {
            format!(
                "{} - {}",
                start.format("%Y-%m-%d %H:%M"),
                end.format("%Y-%m-%d %H:%M")
            )
        }
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| Error::InvalidDate(s.to_string()))
}

fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN))
}

/// Resolve a local wall-clock time; ambiguous times pick the earliest (start)
/// or latest (end) instant so the window never shrinks.
fn local_to_utc(local: NaiveDateTime, tz: Tz, earliest: bool) -> Result<DateTime<Utc>> {
    let mapped = tz.from_local_datetime(&local);
    let resolved = if earliest {
        mapped.earliest()
    } else {
        mapped.latest()
    };
    resolved
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::InvalidWindow(format!("local time {} does not exist in {}", local, tz)))
}
