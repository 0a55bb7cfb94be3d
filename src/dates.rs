//! Civil-date arithmetic for anniversary scheduling.
//!
//! Everything here is pure: "today" is always a parameter, never read from
//! the system clock, so runs are reproducible. The only clock read in the
//! crate is [`today_in_tz`], called once at the invocation boundary when the
//! caller does not inject a date.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Wire format for dates in the organization store.
pub const DATE_FMT: &str = "%Y-%m-%d";

/// Wire format for times in the organization store.
pub const TIME_FMT: &str = "%H:%M:%S";

pub fn is_leap(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

/// The anniversary of `anchor` in `year`.
///
/// A Feb-29 anchor rolls to Feb-28 in non-leap years.
pub fn anniversary_in_year(anchor: NaiveDate, year: i32) -> NaiveDate {
    match NaiveDate::from_ymd_opt(year, anchor.month(), anchor.day()) {
        Some(d) => d,
        // Only Feb-29 can fail to exist in a target year.
        None => NaiveDate::from_ymd_opt(year, 2, 28).unwrap_or(anchor),
    }
}

/// The earliest date >= `today` sharing `anchor`'s month/day (after Feb-29
/// rollover).
pub fn next_anniversary(today: NaiveDate, anchor: NaiveDate) -> NaiveDate {
    let this_year = anniversary_in_year(anchor, today.year());
    if this_year >= today {
        this_year
    } else {
        anniversary_in_year(anchor, today.year() + 1)
    }
}

pub fn add_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

/// Signed day count from `from` to `to` (positive when `to` is later).
pub fn diff_days(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}

/// Today's civil date in the business timezone.
pub fn today_in_tz(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Resolve a local send date + time to a timezone-aware instant, handling
/// DST transitions.
///
/// During a spring-forward gap `earliest()` returns `None`; we fall back to
/// `latest()` (the post-transition instant), and as a last resort interpret
/// the naive time as UTC.
pub fn send_datetime_local(date: NaiveDate, time: NaiveTime, tz: Tz) -> DateTime<Tz> {
    let naive = NaiveDateTime::new(date, time);

    if let Some(dt) = tz.from_local_datetime(&naive).single() {
        return dt;
    }
    if let Some(dt) = tz.from_local_datetime(&naive).earliest() {
        return dt;
    }
    if let Some(dt) = tz.from_local_datetime(&naive).latest() {
        tracing::warn!(%date, %time, %tz, "DST gap at send time; using post-transition instant");
        return dt;
    }

    tracing::warn!(%date, %time, %tz, "could not resolve local send time; falling back to UTC");
    Utc.from_utc_datetime(&naive).with_timezone(&tz)
}

/// Parse a `YYYY-MM-DD` wire date.
pub fn parse_wire_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FMT).ok()
}

/// Parse an `HH:MM:SS` (or `HH:MM`) wire time.
pub fn parse_wire_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, TIME_FMT)
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

pub fn format_wire_date(d: NaiveDate) -> String {
    d.format(DATE_FMT).to_string()
}

pub fn format_wire_time(t: NaiveTime) -> String {
    t.format(TIME_FMT).to_string()
}
