//! Forgiving field deserializers for model-produced JSON.
//!
//! Models routinely emit numbers as strings, `null` for empty lists, or a bare
//! string where a list was asked for. These helpers coerce such values instead
//! of failing the whole document.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Render any scalar as a string; `null`, arrays and objects become `""`.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Read a number from a JSON number or numeric string.
pub fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(value_to_string(&Value::deserialize(d)?))
}

pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = value_to_string(&Value::deserialize(d)?);
    Ok((!s.is_empty()).then_some(s))
}

pub fn f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(value_to_f64(&Value::deserialize(d)?).unwrap_or(0.0))
}

pub fn i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(value_to_f64(&Value::deserialize(d)?)
        .map(|v| v as i64)
        .unwrap_or(0))
}

pub fn u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    Ok(value_to_f64(&Value::deserialize(d)?)
        .filter(|v| *v >= 0.0)
        .map(|v| v as u32)
        .unwrap_or(0))
}

pub fn u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(value_to_f64(&Value::deserialize(d)?)
        .filter(|v| *v >= 0.0)
        .map(|v| v as u64)
        .unwrap_or(0))
}

pub fn opt_u32<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u32>, D::Error> {
    Ok(value_to_f64(&Value::deserialize(d)?)
        .filter(|v| *v > 0.0)
        .map(|v| v as u32))
}

/// A string-keyed map of counters; non-numeric values are dropped.
pub fn count_map<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<std::collections::BTreeMap<String, u64>, D::Error> {
    let Value::Object(map) = Value::deserialize(d)? else {
        return Ok(Default::default());
    };
    Ok(map
        .iter()
        .filter_map(|(k, v)| value_to_f64(v).map(|n| (k.clone(), n.max(0.0) as u64)))
        .collect())
}

/// A list of non-empty strings; a bare string becomes a one-element list.
pub fn string_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    let items = match Value::deserialize(d)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(items
        .iter()
        .map(value_to_string)
        .filter(|s| !s.is_empty())
        .collect())
}

/// A list of JSON values; anything that is not an array becomes empty.
pub fn value_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Value>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

/// A list of `T`, silently skipping elements that do not deserialize.
pub fn vec_skip_invalid<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    let items = match Value::deserialize(d)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(default, deserialize_with = "super::string")]
        name: String,
        #[serde(default, deserialize_with = "super::f64")]
        start: f64,
        #[serde(default, deserialize_with = "super::i64")]
        count: i64,
        #[serde(default, deserialize_with = "super::string_list")]
        tags: Vec<String>,
    }

    #[test]
    fn test_coerces_loose_values() {
        let sample: Sample = serde_json::from_value(serde_json::json!({
            "name": 42,
            "start": "12.5",
            "count": "3",
            "tags": "single"
        }))
        .unwrap();
        assert_eq!(sample.name, "42");
        assert_eq!(sample.start, 12.5);
        assert_eq!(sample.count, 3);
        assert_eq!(sample.tags, vec!["single".to_string()]);
    }

    #[test]
    fn test_nulls_and_missing_fields_default() {
        let sample: Sample =
            serde_json::from_value(serde_json::json!({"name": null, "tags": [null, "", "a"]}))
                .unwrap();
        assert_eq!(sample.name, "");
        assert_eq!(sample.start, 0.0);
        assert_eq!(sample.count, 0);
        assert_eq!(sample.tags, vec!["a".to_string()]);
    }

    #[test]
    fn test_count_map_drops_garbage() {
        #[derive(Deserialize)]
        struct Stats {
            #[serde(default, deserialize_with = "super::count_map")]
            by_type: std::collections::BTreeMap<String, u64>,
        }
        let stats: Stats = serde_json::from_value(serde_json::json!({
            "by_type": {"PHOTO": 2, "CHART": "3", "BAD": "many"}
        }))
        .unwrap();
        assert_eq!(stats.by_type.len(), 2);
        assert_eq!(stats.by_type["CHART"], 3);
    }
}
