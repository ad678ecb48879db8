//! Extraction of a JSON object from free-form model output.
//!
//! Models wrap JSON in markdown fences, surround it with prose, double-encode
//! it as a string, or return a one-element array. [`extract_object`] accepts
//! all of these and yields the root object.

use serde_json::{Map, Value};
use thiserror::Error;

/// Nested string payloads are unwrapped at most this many times.
const MAX_STRING_UNWRAP: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no valid JSON object found")]
    NoJson,

    #[error("JSON root must be an object")]
    NotObject,

    #[error("missing required keys: {}", .0.join(", "))]
    MissingKeys(Vec<String>),
}

/// Remove a leading ```` ```json ```` / ```` ``` ```` fence and a trailing fence.
pub fn strip_fences(text: &str) -> &str {
    let mut t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        t = rest;
        if t.get(..4).is_some_and(|tag| tag.eq_ignore_ascii_case("json")) {
            t = &t[4..];
        }
        t = t.trim_start();
    }
    if let Some(rest) = t.strip_suffix("```") {
        t = rest;
    }
    t.trim()
}

/// Extract the first JSON object from `text`.
pub fn extract_object(text: &str) -> Result<Map<String, Value>, ParseError> {
    extract_with_depth(text, 0)
}

fn extract_with_depth(text: &str, depth: usize) -> Result<Map<String, Value>, ParseError> {
    let cleaned = strip_fences(text);

    let mut saw_json = false;
    if let Ok(value) = serde_json::from_str::<Value>(cleaned) {
        saw_json = true;
        if let Some(obj) = normalize_root(value, depth) {
            return Ok(obj);
        }
    }

    let bytes = cleaned.as_bytes();
    for start in 0..bytes.len() {
        if bytes[start] != b'{' && bytes[start] != b'[' {
            continue;
        }
        let Some(end) = matching_close(bytes, start) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<Value>(&cleaned[start..=end]) {
            saw_json = true;
            if let Some(obj) = normalize_root(value, depth) {
                return Ok(obj);
            }
        }
    }

    if saw_json {
        Err(ParseError::NotObject)
    } else {
        Err(ParseError::NoJson)
    }
}

/// Reduce a parsed value to an object: strings are parsed again, a single
/// object inside an array is unwrapped.
fn normalize_root(value: Value, depth: usize) -> Option<Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj),
        Value::String(inner) if depth < MAX_STRING_UNWRAP => extract_with_depth(&inner, depth + 1).ok(),
        Value::Array(mut items) if items.len() == 1 => match items.pop() {
            Some(Value::Object(obj)) => Some(obj),
            _ => None,
        },
        _ => None,
    }
}

/// Index of the bracket closing the one at `start`, skipping string literals.
fn matching_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Check that every required key is present.
pub fn validate_keys(obj: &Map<String, Value>, required: &[&str]) -> Result<(), ParseError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|k| !obj.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ParseError::MissingKeys(missing))
    }
}

/// Best-effort local fix of truncated or sloppy JSON: closes an open string,
/// drops trailing commas and appends the missing closing brackets.
pub fn heuristic_repair(text: &str) -> Option<Map<String, Value>> {
    let cleaned = strip_fences(text);
    let start = cleaned.find(['{', '['])?;
    let body = &cleaned[start..];

    let mut out = String::with_capacity(body.len() + 8);
    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in body.chars() {
        if in_string {
            out.push(ch);
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() != Some(&ch) {
                    break;
                }
                drop_trailing_comma(&mut out);
                stack.pop();
                out.push(ch);
                if stack.is_empty() {
                    break;
                }
                continue;
            }
            _ => {}
        }
        out.push(ch);
    }

    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(':') {
        out.push_str(" null");
    }
    while let Some(close) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(close);
    }

    extract_object(&out).ok()
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    if out.ends_with(',') {
        out.pop();
    }
}

/// Extract and validate in one step.
pub fn parse_required(text: &str, required: &[&str]) -> Result<Map<String, Value>, ParseError> {
    let obj = extract_object(text)?;
    validate_keys(&obj, required)?;
    Ok(obj)
}
