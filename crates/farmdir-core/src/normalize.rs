//! Pure conversions from CRM field representations into storage types.
//!
//! None of these functions fail: input that cannot be interpreted degrades to
//! `None` (unknown) instead of raising.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Maximum slug length before collision suffixes are appended.
pub const MAX_SLUG_LEN: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Joins a sequence with `", "`, passes strings through, maps null/absent to `None`.
pub fn to_delimited_list(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_text)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        other => value_to_text(other),
    }
}

/// Splits a stored delimited list back into trimmed, non-empty items.
///
/// Older rows may hold a JSON array literal instead of a comma-joined string.
pub fn split_delimited_list(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.starts_with('[') {
        if let Ok(items) = serde_json::from_str::<Vec<String>>(trimmed) {
            return items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Yes/no/1/0/true/false in any case; anything else is unknown.
pub fn parse_tri_state(value: Option<&JsonValue>) -> Option<bool> {
    match value? {
        JsonValue::Bool(b) => Some(*b),
        JsonValue::Number(n) => match n.as_f64() {
            Some(v) if v == 1.0 => Some(true),
            Some(v) if v == 0.0 => Some(false),
            _ => None,
        },
        JsonValue::String(s) => parse_tri_state_text(s),
        _ => None,
    }
}

pub fn parse_tri_state_text(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?").expect("Invalid regex pattern for price numbers")
});

/// Smallest and largest number mentioned anywhere in a free-text price range.
pub fn parse_price_range(text: Option<&str>) -> PriceRange {
    let Some(text) = text else {
        return PriceRange::default();
    };
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<f64>().ok())
        .fold(PriceRange::default(), |range, n| PriceRange {
            min: Some(range.min.map_or(n, |m| m.min(n))),
            max: Some(range.max.map_or(n, |m| m.max(n))),
        })
}

/// Lowercase, collapse every run outside `[a-z0-9]` into one hyphen, trim, cap length.
pub fn to_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(ch);
        } else {
            pending_hyphen = true;
        }
    }
    // ASCII only at this point, so byte truncation is char-safe.
    slug.truncate(MAX_SLUG_LEN);
    slug.trim_end_matches('-').to_string()
}

/// Empty string or null becomes `None`; numeric strings are coerced.
pub fn to_number_or_null(value: Option<&JsonValue>) -> Option<f64> {
    let parsed = match value? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

pub fn to_integer_or_null(value: Option<&JsonValue>) -> Option<i32> {
    let n = to_number_or_null(value)?;
    let truncated = n.trunc();
    if truncated >= f64::from(i32::MIN) && truncated <= f64::from(i32::MAX) {
        Some(truncated as i32)
    } else {
        None
    }
}

/// Text form of a scalar JSON value; CRM lookup objects yield their `name`.
pub fn value_to_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Array(_) => to_delimited_list(Some(value)),
        JsonValue::Object(map) => map.get("name").and_then(|v| v.as_str()).map(ToString::to_string),
    }
}

/// Trimmed text, or `None` when blank.
pub fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}
