//! Field normalization for progress frames.
//!
//! Frames come from two transports and several backend versions, so the same
//! field can arrive under different names. Precedence rules:
//!
//! | field            | accepted keys (first match wins)        |
//! |------------------|-----------------------------------------|
//! | phase            | `phase` (string), else previous phase   |
//! | progress         | `pct` (0-100), else `progress` × 100    |
//! | urls processed   | `urls_processed`, `urlsProcessed`       |
//! | last url         | `last_url`, `lastUrl`                   |
//! | eta              | `eta_seconds`, `etaSeconds`             |
//! | stats counters   | snake_case, then camelCase              |
//!
//! Percentages are clamped to 0..=100 and rounded to the nearest integer.

use serde_json::{Map, Value};

use super::types::{JobState, JobStats, ProgressUpdate};

/// Parse a raw frame. Returns `None` for anything that is not a JSON object.
pub fn parse_frame(raw: &str, previous_phase: Option<&str>) -> Option<ProgressUpdate> {
    let value: Value = serde_json::from_str(raw).ok()?;
    normalize_frame(&value, previous_phase)
}

/// Normalize a decoded frame. Returns `None` when `value` is not an object.
pub fn normalize_frame(value: &Value, previous_phase: Option<&str>) -> Option<ProgressUpdate> {
    let obj = value.as_object()?;

    let phase = obj
        .get("phase")
        .and_then(Value::as_str)
        .or(previous_phase)
        .map(str::to_string);

    let progress = match obj.get("pct").and_then(Value::as_f64) {
        Some(pct) => clamp_percent(pct),
        None => obj
            .get("progress")
            .and_then(Value::as_f64)
            .and_then(|fraction| clamp_percent(fraction * 100.0)),
    };

    Some(ProgressUpdate {
        phase,
        progress,
        state: obj
            .get("state")
            .and_then(Value::as_str)
            .and_then(JobState::from_label),
        urls_processed: first_u64(obj, &["urls_processed", "urlsProcessed"]),
        last_url: first_str(obj, &["last_url", "lastUrl"]),
        stats: obj.get("stats").and_then(Value::as_object).map(parse_stats),
        retries: first_u64(obj, &["retries"]).map(|r| r.min(u32::MAX as u64) as u32),
        eta_seconds: first_u64(obj, &["eta_seconds", "etaSeconds"]),
        error: first_str(obj, &["error"]),
    })
}

/// Clamp to 0..=100 and round. Non-finite input yields `None`.
pub fn clamp_percent(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).round() as u8)
}

fn parse_stats(obj: &Map<String, Value>) -> JobStats {
    JobStats {
        pages_fetched: first_u64(obj, &["pages_fetched", "pagesFetched"]).unwrap_or(0),
        docs_indexed: first_u64(obj, &["docs_indexed", "docsIndexed"]).unwrap_or(0),
        skipped: first_u64(obj, &["skipped"]).unwrap_or(0),
        deduped: first_u64(obj, &["deduped"]).unwrap_or(0),
        embedded: first_u64(obj, &["embedded"]).unwrap_or(0),
    }
}

fn first_u64(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| {
        let value = obj.get(*key)?;
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f.round() as u64)
        })
    })
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
