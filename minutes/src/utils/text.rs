//! Text shaping helpers for prompts, fallbacks, and similarity scoring.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());

static KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9ก-๙]{3,}").unwrap());

/// Marker inserted where the middle of an overlong prompt was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[...TRUNCATED_FOR_TOKEN_LIMIT...]\n\n";

/// Prompts at or below this many characters are never shrunk.
pub const SHRINK_THRESHOLD_CHARS: usize = 12_000;

/// Collapse every run of whitespace to a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop immediately repeated tokens ("the the plan" -> "the plan").
pub fn remove_stutter(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    for token in text.split_whitespace() {
        if out.last().is_some_and(|prev| prev.eq_ignore_ascii_case(token)) {
            continue;
        }
        out.push(token);
    }
    out.join(" ")
}

/// Remove markup tags, leaving the text content.
pub fn strip_html(text: &str) -> String {
    HTML_TAG_RE.replace_all(text, " ").into_owned()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Lowercased keyword tokens of three or more letters/digits (Latin and Thai).
pub fn keyword_tokens(text: &str) -> std::collections::BTreeSet<String> {
    KEYWORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Cosine similarity over the shared prefix of two vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for i in 0..n {
        dot += a[i] * b[i];
        na += a[i] * a[i];
        nb += b[i] * b[i];
    }
    dot / (na.sqrt() * nb.sqrt() + 1e-9)
}

/// Replace `<<KEY>>` placeholders with their values.
pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in values {
        out = out.replace(&format!("<<{key}>>"), value);
    }
    out
}

/// Keep the head (55%) and tail (35%) of an overlong prompt, dropping the middle.
///
/// Returns the input unchanged when it is at or below [`SHRINK_THRESHOLD_CHARS`].
pub fn shrink_prompt_text(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n <= SHRINK_THRESHOLD_CHARS {
        return text.to_string();
    }
    let head = n * 55 / 100;
    let tail = n * 35 / 100;
    let mut out: String = chars[..head].iter().collect();
    out.push_str(TRUNCATION_MARKER);
    out.extend(chars[n - tail..].iter());
    out
}

/// Split text into paragraphs on blank lines, joining wrapped lines with spaces.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let text = text.replace('\r', "");
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
            continue;
        }
        current.push(line);
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}

/// Escape text for inclusion in HTML content or attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Stable short hex digest used as a content identity key.
pub fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(&hasher.finalize()[..12])
}
