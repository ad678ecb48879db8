//! Environment variable readers with defaults.

use std::str::FromStr;

/// A trimmed, non-empty environment value.
pub fn string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn string_or(name: &str, default: &str) -> String {
    string(name).unwrap_or_else(|| default.to_string())
}

/// Parse a value, falling back to `default` when unset or unparsable.
pub fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse an integer and clamp it to `min`.
pub fn usize_min(name: &str, default: usize, min: usize) -> usize {
    parse_or(name, default).max(min)
}

pub fn bool_or(name: &str, default: bool) -> bool {
    match string(name) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_values_use_defaults() {
        assert_eq!(string("MINUTES_TEST_SURELY_UNSET"), None);
        assert_eq!(parse_or("MINUTES_TEST_SURELY_UNSET", 7u32), 7);
        assert_eq!(usize_min("MINUTES_TEST_SURELY_UNSET", 0, 1), 1);
        assert!(bool_or("MINUTES_TEST_SURELY_UNSET", true));
    }
}
