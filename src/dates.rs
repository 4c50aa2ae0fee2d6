use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use std::sync::LazyLock;

/// Returned when a date cannot be understood at all.
pub const UNKNOWN_DATE_MS: i64 = 0;

/// Upload date format used by most machine-translation sites ("05 March 2024").
pub const DEFAULT_DATE_FORMAT: &str = "%d %B %Y";

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").expect("static regex"));

/// Parses a chapter upload date into epoch milliseconds.
///
/// Absolute dates are tried first, then relative phrases such as
/// "3 days ago". Anything else yields `UNKNOWN_DATE_MS`.
pub fn parse_chapter_date(text: Option<&str>, format: &str) -> i64 {
    parse_chapter_date_at(text, format, Utc::now())
}

pub fn parse_chapter_date_at(text: Option<&str>, format: &str, now: DateTime<Utc>) -> i64 {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return UNKNOWN_DATE_MS;
    };

    if let Some(ms) = parse_absolute(text, format) {
        return ms;
    }

    match parse_relative(text, now) {
        Some(ms) => ms,
        None => {
            log::debug!("Unrecognised chapter date {:?}, using {}", text, UNKNOWN_DATE_MS);
            UNKNOWN_DATE_MS
        }
    }
}

fn parse_absolute(text: &str, format: &str) -> Option<i64> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(text, format)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn parse_relative(text: &str, now: DateTime<Utc>) -> Option<i64> {
    let lower = text.to_lowercase();
    let number: i64 = NUMBER.captures(&lower)?.get(1)?.as_str().parse().ok()?;

    let when = if lower.contains("year") {
        now.checked_sub_months(Months::new(u32::try_from(number.checked_mul(12)?).ok()?))?
    } else if lower.contains("month") {
        now.checked_sub_months(Months::new(u32::try_from(number).ok()?))?
    } else if lower.contains("week") {
        now.checked_sub_signed(Duration::try_weeks(number)?)?
    } else if lower.contains("day") {
        now.checked_sub_signed(Duration::try_days(number)?)?
    } else if lower.contains("hour") {
        now.checked_sub_signed(Duration::try_hours(number)?)?
    } else if lower.contains("min") {
        now.checked_sub_signed(Duration::try_minutes(number)?)?
    } else if lower.contains("sec") {
        now.checked_sub_signed(Duration::try_seconds(number)?)?
    } else {
        return None;
    };
    Some(when.timestamp_millis())
}
