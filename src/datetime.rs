//! Date/time utilities for the aggregator.
//!
//! Two representations exist: HTTP-date strings at the fetch boundary and
//! a single normalized text form inside the store.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Parse an HTTP-date (`Last-Modified` style) into UTC.
///
/// Accepts the IMF-fixdate form (`Sun, 06 Nov 1994 08:49:37 GMT`) as well as
/// the obsolete RFC 850 (`Sunday, 06-Nov-94 08:49:37 GMT`) and asctime
/// (`Sun Nov  6 08:49:37 1994`) forms. Returns `None` for anything else.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT") {
        return Some(naive.and_utc());
    }

    NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Render a timestamp as an IMF-fixdate, e.g. for `If-Modified-Since`.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Convert a timestamp to its stored text form.
///
/// Fixed-width RFC 3339 in UTC, so stored values order lexicographically.
pub fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// Also accepts the `YYYY-MM-DD HH:MM:SS` form SQLite produces for
/// `datetime('now')`.
pub fn parse_db_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
