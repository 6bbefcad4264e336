//! Date window helpers for the update pipeline.
//!
//! Providers address data by `YYYYMMDD` (days) and `YYYYMM01` (months);
//! the store keeps ISO `YYYY-MM-DD`. Everything here converts between the
//! two and walks windows.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Duration, NaiveDate};

/// Parse a `YYYY-MM-DD` date as used on the CLI and in the store.
pub fn parse_iso_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date: {s}"))
}

/// Parse a compact `YYYYMMDD` date as used in provider URLs.
pub fn parse_compact_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y%m%d").with_context(|| format!("invalid compact date: {s}"))
}

/// `YYYYMMDD` form of a date.
pub fn compact(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// `YYYY-MM-DD` form of a date.
pub fn iso(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Normalize a provider date to `YYYYMMDD`, accepting either form.
pub fn to_compact_str(s: &str) -> String {
    s.replace('-', "")
}

/// Normalize a provider date to `YYYY-MM-DD`, accepting either form.
pub fn to_iso_str(s: &str) -> String {
    let compact = to_compact_str(s);
    if compact.len() == 8 && compact.chars().all(|c| c.is_ascii_digit()) {
        format!("{}-{}-{}", &compact[..4], &compact[4..6], &compact[6..8])
    } else {
        s.to_string()
    }
}

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

/// First days of every calendar month touched by `[start, end]`, ascending.
///
/// The monthly cups endpoint takes `YYYYMM01`, so this is exactly the S1
/// fetch list for a window.
pub fn months_in_window(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    if start > end {
        bail!("window start {start} is after end {end}");
    }
    let mut months = Vec::new();
    let mut cursor = month_start(start);
    while cursor <= end {
        months.push(cursor);
        cursor = if cursor.month() == 12 {
            NaiveDate::from_ymd_opt(cursor.year() + 1, 1, 1)
                .context("month rollover out of range")?
        } else {
            NaiveDate::from_ymd_opt(cursor.year(), cursor.month() + 1, 1)
                .context("month rollover out of range")?
        };
    }
    Ok(months)
}

/// Every day in `[start, end]`, ascending.
pub fn days_in_window(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        days.push(cursor);
        cursor = cursor + Duration::days(1);
    }
    days
}
