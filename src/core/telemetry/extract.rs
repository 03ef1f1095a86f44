//! Ordered extraction rules for loosely-shaped JSON records.
//!
//! Every aggregator describes where a field may live as a list of JSON paths
//! in priority order; the first path holding a usable value wins. This keeps
//! schema drift between producers in one table per field instead of chained
//! optional lookups at each call site.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::core::error::SourceError;

/// A JSON path, e.g. `&["report", "business", "name"]`.
pub type Rule = &'static [&'static str];

pub fn lookup<'v>(value: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(value, |current, key| current.get(*key))
}

pub fn first_string(value: &Value, rules: &[Rule]) -> Option<String> {
    rules
        .iter()
        .filter_map(|rule| lookup(value, rule))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .trim()
                .chars()
                .filter(|c| !matches!(c, '$' | ',' | '€' | '£' | ' '))
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}

pub fn first_number(value: &Value, rules: &[Rule]) -> Option<f64> {
    rules
        .iter()
        .filter_map(|rule| lookup(value, rule))
        .find_map(as_number)
}

pub fn first_timestamp(value: &Value, rules: &[Rule]) -> Option<DateTime<Utc>> {
    rules
        .iter()
        .filter_map(|rule| lookup(value, rule))
        .find_map(parse_timestamp)
}

/// Epoch numbers above this are milliseconds, below are seconds.
const MILLIS_THRESHOLD: f64 = 100_000_000_000.0;

pub fn epoch_to_utc(raw: f64) -> Option<DateTime<Utc>> {
    if raw <= 0.0 {
        return None;
    }
    let millis = if raw >= MILLIS_THRESHOLD {
        raw
    } else {
        raw * 1000.0
    };
    DateTime::from_timestamp_millis(millis as i64)
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_utc),
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

/// RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` (taken as UTC, the SQLite
/// `CURRENT_TIMESTAMP` convention), bare dates (local midnight) and epoch digits.
pub fn parse_timestamp_str(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date.and_hms_opt(0, 0, 0)?;
        return Local
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc));
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<f64>().ok().and_then(epoch_to_utc);
    }
    None
}

/// Records of a collection file: either a bare array or an object holding the
/// array under `key`. Anything else is a shape mismatch.
pub fn collection(value: Value, key: &str, source_name: &str) -> Result<Vec<Value>, SourceError> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(other) => Err(SourceError::shape(
                source_name,
                format!("'{}' is {} rather than an array", key, kind_of(&other)),
            )),
            None => Err(SourceError::shape(
                source_name,
                format!("object without a '{}' array", key),
            )),
        },
        other => Err(SourceError::shape(
            source_name,
            format!("expected array or object, got {}", kind_of(&other)),
        )),
    }
}

/// Parse JSON printed by a CLI, tolerating banner or warning lines before the
/// document starts.
pub fn json_from_cli(stdout: &str) -> Option<Value> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }
    let mut offset = 0;
    for line in trimmed.split_inclusive('\n') {
        if line.trim_start().starts_with(['{', '['])
            && let Ok(value) = serde_json::from_str(&trimmed[offset..])
        {
            return Some(value);
        }
        offset += line.len();
    }
    None
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn first_string_honours_rule_order_and_skips_blanks() {
        let doc = json!({"name": "", "report": {"name": "Nested"}, "title": "Top"});
        let rules: &[Rule] = &[&["name"], &["report", "name"], &["title"]];
        assert_eq!(first_string(&doc, rules).as_deref(), Some("Nested"));
    }

    #[test]
    fn numbers_accept_numeric_strings_with_currency() {
        assert_eq!(as_number(&json!("$1,250.50")), Some(1250.5));
        assert_eq!(as_number(&json!(42)), Some(42.0));
        assert_eq!(as_number(&json!("n/a")), None);
        assert_eq!(as_number(&json!(null)), None);
    }

    #[test]
    fn timestamps_accept_rfc3339_naive_and_epoch_forms() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2026-03-01T12:30:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2026-03-01T14:30:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2026-03-01 12:30:00")), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(0)), None);
    }

    #[test]
    fn bare_dates_are_local_midnight() {
        let parsed = parse_timestamp_str("2026-03-01").unwrap();
        let local = parsed.with_timezone(&Local);
        assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(local.time(), chrono::NaiveTime::MIN);
    }

    #[test]
    fn collection_accepts_bare_and_keyed_arrays() {
        assert_eq!(collection(json!([1, 2]), "jobs", "t").unwrap().len(), 2);
        assert_eq!(collection(json!({"jobs": [1]}), "jobs", "t").unwrap().len(), 1);
        assert!(collection(json!({"jobs": {"a": 1}}), "jobs", "t").is_err());
        assert!(collection(json!({"other": []}), "jobs", "t").is_err());
        assert!(collection(json!("text"), "jobs", "t").is_err());
    }

    #[test]
    fn json_from_cli_skips_banner_lines() {
        let out = "[plugins] loaded 3 plugins\n{\"jobs\": []}";
        assert_eq!(json_from_cli(out), Some(json!({"jobs": []})));
        assert_eq!(json_from_cli("[1, 2]"), Some(json!([1, 2])));
        assert_eq!(json_from_cli("no json here"), None);
        assert_eq!(json_from_cli(""), None);
    }

    #[test]
    fn round_cents_rounds_half_up() {
        assert_eq!(round_cents(10.005_1), 10.01);
        assert_eq!(round_cents(99.994), 99.99);
    }
}
