//! Timestamp normalization for merge comparisons.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y%m%dT%H%M%S",
];

/// Normalize an event time to milliseconds since the epoch.
///
/// Zoned values are converted to UTC; naive values are read as UTC so that
/// two naive values compare by wall clock. Numbers are taken as epoch
/// milliseconds. Objects with `dateTime` or `date` keys are unwrapped.
pub fn normalize(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => parse_str(s.trim()),
        Value::Object(map) => map
            .get("dateTime")
            .or_else(|| map.get("date"))
            .and_then(normalize),
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }

    // iCalendar UTC form, e.g. 20240101T100000Z
    if let Some(basic) = s.strip_suffix('Z') {
        if let Ok(dt) = NaiveDateTime::parse_from_str(basic, "%Y%m%dT%H%M%S") {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    for format in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    ["%Y-%m-%d", "%Y%m%d"].iter().find_map(|format| {
        NaiveDate::parse_from_str(s, format)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp_millis())
    })
}
