//! Timestamp helpers: current time, flexible date parsing, formatting.
//!
//! Record timestamps are integers in milliseconds since the Unix epoch.
//! [`parse_date_to_timestamp`] accepts the handful of human date formats
//! the system recognizes; [`timestamp_from_number`] applies the heuristic
//! for bare numeric inputs (relative seconds vs epoch seconds vs epoch
//! millis).

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use crate::error::Error;

/// Current timestamp, milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Numbers below this are interpreted as "seconds ago" rather than as an
/// absolute timestamp (the boundary falls in December 1979, epoch seconds).
const RELATIVE_SECONDS_BOUND: f64 = 315_360_000.0;

/// Date formats accepted by [`parse_date_to_timestamp`], tried in order.
const DATE_ONLY_FORMATS: &[&str] = &["%Y%m%d", "%y%m%d", "%Y-%m-%d", "%y-%m-%d", "%d/%m/%Y", "%d/%m/%y"];

const DATE_TIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%y-%m-%d %H:%M",
    "%y-%m-%d %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%y %H:%M",
    "%d/%m/%y %H:%M:%S",
];

/// Parses a date string into a millisecond timestamp (UTC).
///
/// Tries the known datetime formats first, then date-only formats
/// (midnight UTC). Fails with [`Error::InvalidDate`] when nothing matches.
///
/// # Errors
///
/// Returns [`Error::InvalidDate`] when the string matches no known format.
pub fn parse_date_to_timestamp(date: &str) -> Result<i64, Error> {
    let trimmed = date.trim();

    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(dt.and_utc().timestamp_millis());
        }
    }

    for format in DATE_ONLY_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            let midnight = d.and_hms_opt(0, 0, 0).ok_or_else(|| Error::InvalidDate(date.to_string()))?;
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }

    Err(Error::InvalidDate(date.to_string()))
}

/// Interprets a bare number as a millisecond timestamp.
///
/// Small values are treated as an offset of seconds into the past, values
/// in the epoch-seconds range are scaled to millis, and anything larger is
/// taken to already be in millis.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn timestamp_from_number(value: f64) -> i64 {
    #[allow(clippy::cast_precision_loss)]
    let now_ms = now_millis() as f64;

    if value < RELATIVE_SECONDS_BOUND {
        (now_ms - value * 1000.0) as i64
    } else if value * 1000.0 < now_ms * 10.0 {
        // Epoch seconds: scale to millis.
        (value * 1000.0) as i64
    } else {
        value as i64
    }
}

/// Formats a millisecond timestamp as a UTC string.
#[must_use]
pub fn timestamp_to_string(timestamp_ms: i64, format: &str) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp_millis(timestamp_ms)
        .unwrap_or_else(|| DateTime::from_timestamp_millis(0).unwrap_or_default());
    dt.format(format).to_string()
}

/// The default format used when formatting timestamps for humans.
pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
