use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::Value;

use crate::error::{MirrorError, Result};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Zurich;

/// Timestamp stored for records whose own timestamp is missing or unreadable:
/// 2012-03-03T10:10:10 local time.
pub fn sentinel_timestamp(tz: Tz) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2012, 3, 3)
        .and_then(|d| d.and_hms_opt(10, 10, 10))
        .and_then(|naive| tz.from_local_datetime(&naive).single())
        .map(|ts| ts.with_timezone(&Utc))
        .unwrap_or_default()
}

pub fn epoch_seconds_to_utc(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().clamp(0.0, 999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}

/// Upstream timestamps are float epoch seconds; anything else falls back to
/// the sentinel instead of failing the record.
pub fn timestamp_or_sentinel(value: Option<&Value>, tz: Tz) -> DateTime<Utc> {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64().and_then(epoch_seconds_to_utc),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|ts| ts.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(epoch_seconds_to_utc)),
        _ => None,
    };
    parsed.unwrap_or_else(|| sentinel_timestamp(tz))
}

pub fn format_local(ts: DateTime<Utc>, tz: Tz) -> String {
    ts.with_timezone(&tz)
        .to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

pub fn parse_timezone(input: &str) -> Result<Tz> {
    input
        .parse::<Tz>()
        .map_err(|e| MirrorError::Parse(format!("invalid timezone {input}: {e}")))
}

pub fn parse_duration_str(input: &str) -> Result<Duration> {
    humantime::parse_duration(input)
        .map_err(|e| MirrorError::Parse(format!("invalid duration {input}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_is_local_wall_clock() {
        let ts = sentinel_timestamp(DEFAULT_TIMEZONE);
        assert_eq!(ts.to_rfc3339(), "2012-03-03T09:10:10+00:00");
        assert_eq!(format_local(ts, DEFAULT_TIMEZONE), "2012-03-03T10:10:10+01:00");
    }

    #[test]
    fn parses_float_epoch() {
        let value = serde_json::json!(1579729985.5);
        let ts = timestamp_or_sentinel(Some(&value), DEFAULT_TIMEZONE);
        assert_eq!(ts.timestamp(), 1579729985);
        assert_eq!(ts.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn garbage_falls_back_to_sentinel() {
        let sentinel = sentinel_timestamp(DEFAULT_TIMEZONE);
        let bad = serde_json::json!({"not": "a time"});
        assert_eq!(timestamp_or_sentinel(Some(&bad), DEFAULT_TIMEZONE), sentinel);
        assert_eq!(timestamp_or_sentinel(None, DEFAULT_TIMEZONE), sentinel);
        let text = serde_json::json!("yesterday");
        assert_eq!(timestamp_or_sentinel(Some(&text), DEFAULT_TIMEZONE), sentinel);
    }

    #[test]
    fn rejects_unknown_timezone() {
        assert!(parse_timezone("Mars/Olympus").is_err());
        assert_eq!(parse_timezone("UTC").unwrap(), chrono_tz::UTC);
    }
}
