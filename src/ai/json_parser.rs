//! Tolerant parsing of model output
//!
//! Backends do not reliably honor "return only JSON". Content may arrive as
//! a string, a list of typed segments or a nested object, may carry
//! chain-of-thought segments or inline `<think>` blocks, and the JSON itself
//! may be wrapped in prose or code fences.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Segment types whose text must never reach the JSON parser
const DISCARDED_SEGMENT_TYPES: [&str; 3] = ["thinking", "reasoning", "metadata"];

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("think pattern is valid"));

/// Flatten message content to plain text, dropping reasoning segments.
pub fn flatten_content(value: &Value) -> String {
    let mut out = String::new();
    flatten_into(value, &mut out);
    out
}

fn flatten_into(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for item in items {
                flatten_into(item, out);
            }
        }
        Value::Object(map) => {
            let declared_type = map.get("type").and_then(Value::as_str).unwrap_or("");
            if DISCARDED_SEGMENT_TYPES.contains(&declared_type.to_ascii_lowercase().as_str()) {
                return;
            }
            // Gemini marks thought parts with a flag instead of a type
            if map.get("thought").and_then(Value::as_bool).unwrap_or(false) {
                return;
            }

            if let Some(text) = map.get("text") {
                flatten_into(text, out);
            } else if let Some(content) = map.get("content") {
                flatten_into(content, out);
            } else if let Some(parts) = map.get("parts") {
                flatten_into(parts, out);
            } else if !map.is_empty() {
                // Structured output returned as an object already
                out.push_str(&value.to_string());
            }
        }
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(_) | Value::Null => {}
    }
}

/// Remove inline `<think>...</think>` blocks (non-greedy, multi-line).
pub fn strip_think_blocks(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").into_owned()
}

/// Parse `text` as JSON, or failing that, the first balanced `{...}` span
/// that parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    let mut search_from = 0;
    while let Some(offset) = trimmed[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = balanced_object_end(&trimmed[start..]) {
            let candidate = &trimmed[start..start + end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
        search_from = start + 1;
    }

    None
}

/// Byte length of the balanced object starting at `text[0] == '{'`.
///
/// Braces inside string literals (including escaped quotes) are ignored.
fn balanced_object_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + c.len_utf8());
                }
            }
            _ => {}
        }
    }

    None
}

/// Full cleanup pipeline: flatten, strip think blocks, extract JSON.
pub fn parse_model_output(content: &Value) -> Option<Value> {
    let flattened = flatten_content(content);
    let cleaned = strip_think_blocks(&flattened);
    extract_json(&cleaned)
}
