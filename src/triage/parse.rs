//! Triage response parsing and sanitization
//!
//! The reasoning call returns free text that should be a JSON array of
//! per-message classification objects, but models wrap output in code
//! fences, return a bare object for single messages, or produce junk.
//! Parsing is total: for any input it returns exactly `expected` results,
//! each a valid (possibly empty) `TriageResult`.

use serde_json::Value;
use tracing::warn;

use crate::types::{Priority, TriageResult};

/// Maximum labels kept per message.
pub const MAX_LABELS: usize = 5;

/// Maximum action text length, in characters.
pub const MAX_ACTION_CHARS: usize = 200;

/// Parse a triage response into exactly `expected` results. A short list is
/// padded with empty results, a long one truncated; anything unparseable
/// yields all-empty results so downstream processing stays uniform.
pub fn parse_triage_response(text: &str, expected: usize) -> Vec<TriageResult> {
    let mut results = match serde_json::from_str::<Value>(strip_code_fence(text)) {
        Ok(Value::Array(items)) => items.iter().map(sanitize_result).collect(),
        // A single object is treated as a one-element array
        Ok(value @ Value::Object(_)) => vec![sanitize_result(&value)],
        Ok(_) | Err(_) => {
            if !text.trim().is_empty() {
                warn!("unparseable triage response, using empty results");
            }
            Vec::new()
        }
    };

    results.truncate(expected);
    results.resize_with(expected, TriageResult::default);
    results
}

/// Strip a Markdown code fence (with optional language tag) wrapping the
/// payload, if present. Returns the input trimmed otherwise.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

/// Sanitize one parsed classification object into a `TriageResult`:
/// priority restricted to the four known levels or dropped, labels filtered
/// to strings and capped, flag coerced to bool or dropped, action truncated.
pub fn sanitize_result(value: &Value) -> TriageResult {
    let priority = value
        .get("priority")
        .and_then(Value::as_str)
        .and_then(Priority::parse);

    let labels = value
        .get("labels")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .take(MAX_LABELS)
                .collect()
        })
        .unwrap_or_default();

    let flag = value.get("flag").and_then(Value::as_bool);

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .map(|s| s.chars().take(MAX_ACTION_CHARS).collect::<String>())
        .filter(|s| !s.is_empty());

    TriageResult {
        priority,
        labels,
        flag,
        action,
    }
}
