//! Shared time types and conversions
//!
//! Timestamps travel over the wire in two shapes: epoch milliseconds (query
//! parameters, continuous backup API) and ISO-8601 offset date-times (backup
//! details, routine state). Internally everything is epoch milliseconds.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};

/// Standard datetime type for database entities.
pub type DBDateTime = DateTime<Utc>;

/// Standard datetime type for API payloads.
pub type UtcDateTime = DateTime<Utc>;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn epoch_millis(value: &DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

/// Out-of-range values collapse to the epoch.
pub fn from_epoch_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an offset date-time into epoch millis.
///
/// A missing or blank value means "not yet recorded" and maps to `0`, so a
/// routine without backups is distinguishable from a malformed timestamp.
pub fn parse_offset_date_time(value: Option<&str>) -> Result<i64, chrono::ParseError> {
    match value.map(str::trim) {
        None | Some("") => Ok(0),
        Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)?.timestamp_millis()),
    }
}

/// Render epoch millis as an offset date-time, `None` for "not yet recorded".
pub fn format_offset_date_time(millis: i64) -> Option<String> {
    if millis <= 0 {
        return None;
    }
    Some(from_epoch_millis(millis).to_rfc3339_opts(SecondsFormat::Millis, true))
}
