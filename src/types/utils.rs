//! Shared helpers for JSON extraction, numeric rounding, and enum parsing.
//!
//! ## JSON Extraction Helpers
//!
//! - `json_string` - Extract strings
//! - `json_f64` - Extract numbers, accepting numeric strings

use serde::Serialize;
use serde_json::Value;
use std::fmt::Display;

// =============================================================================
// JSON Value Extraction Helpers
// =============================================================================

/// Extract string from JSON value by key.
#[inline]
pub fn json_string(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(String::from)
}

/// Extract a number by key. Stored rows frequently carry numbers as strings.
#[inline]
pub fn json_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(value_as_f64)
}

/// Interpret a JSON scalar as a number.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// True for `null`, `{}`, `[]`, and `""`.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

// =============================================================================
// Numeric Helpers
// =============================================================================

/// Round to one decimal place.
#[inline]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `round(part / whole * 100)`, zero when `whole` is zero.
#[inline]
pub fn round_pct(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        (part / whole * 100.0).round()
    }
}

// =============================================================================
// String Utilities
// =============================================================================

/// Capitalize the first character of a string.
#[inline]
pub fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

// =============================================================================
// Type Parsing
// =============================================================================

/// Parse strings into enum types with a logged default fallback.
///
/// Used for values read back from the store where an unknown string should
/// degrade gracefully rather than abort the load.
pub trait ParseWithDefault: Sized {
    fn type_name() -> &'static str;

    fn default_value() -> Self;

    fn try_parse(s: &str) -> Option<Self>;

    fn parse_or_default(s: &str) -> Self {
        match Self::try_parse(s) {
            Some(v) => v,
            None => {
                tracing::warn!("Invalid {} value '{}', using default", Self::type_name(), s);
                Self::default_value()
            }
        }
    }
}

/// Serialize an enum to its serde string representation (without quotes).
pub fn enum_to_str<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_default()
        .trim_matches('"')
        .to_string()
}

/// Filter a Result, logging the discarded error at warn level.
pub fn log_filter_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("{}: {}", context, e);
            None
        }
    }
}
