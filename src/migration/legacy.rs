//! Legacy namespaces
//!
//! Earlier storage generations left records in two places:
//!
//! - fallback keys outside any store namespace: `<tool_prefix><tool>` holds
//!   a tool's whole state, `<keyed_prefix><tool>:<key>` one keyed record;
//! - older primary databases, listed by name, opened read-only.

use serde_json::Value;

/// Key given to a whole-tool legacy record
pub const MAIN_DATA_KEY: &str = "main-data";

/// Source label for records found in the fallback medium
pub const FALLBACK_SOURCE: &str = "fallback";

/// A legacy record already mapped to its canonical location
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyItem {
    /// Where the record was found
    pub source: String,
    pub store: String,
    pub key: String,
    /// Canonical payload
    pub value: Value,
}

/// Key patterns of the legacy fallback namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyKeyPattern {
    tool_prefix: String,
    keyed_prefix: String,
}

impl LegacyKeyPattern {
    pub fn new(tool_prefix: impl Into<String>, keyed_prefix: impl Into<String>) -> Self {
        Self {
            tool_prefix: tool_prefix.into(),
            keyed_prefix: keyed_prefix.into(),
        }
    }

    /// Maps a raw fallback key to `(store, key)`, or `None` if it is not a
    /// legacy key
    pub fn parse(&self, raw_key: &str) -> Option<(String, String)> {
        // The keyed prefix is checked first since it may extend the tool prefix
        if let Some(rest) = raw_key.strip_prefix(&self.keyed_prefix) {
            let (tool, key) = rest.split_once(':')?;
            if tool.is_empty() || key.is_empty() {
                return None;
            }
            return Some((tool.to_string(), key.to_string()));
        }
        let tool = raw_key.strip_prefix(&self.tool_prefix)?;
        if tool.is_empty() || tool.contains(':') {
            return None;
        }
        Some((tool.to_string(), MAIN_DATA_KEY.to_string()))
    }

    /// Scans raw fallback entries for legacy records
    pub fn scan(&self, entries: &[(String, String)]) -> Vec<LegacyItem> {
        entries
            .iter()
            .filter_map(|(raw_key, raw_value)| {
                let (store, key) = self.parse(raw_key)?;
                Some(LegacyItem {
                    source: FALLBACK_SOURCE.to_string(),
                    store,
                    key,
                    value: transform_raw(raw_value),
                })
            })
            .collect()
    }
}

/// Canonical payload of a raw legacy string: JSON is parsed and then
/// unwrapped, anything else is kept as a string
pub fn transform_raw(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => transform_value(value),
        Err(_) => Value::String(raw.to_string()),
    }
}

/// Canonical payload of a legacy value.
///
/// `{data, timestamp}` envelopes (with no other fields) unwrap to `data`.
/// Strings holding a JSON object or array are parsed.
pub fn transform_value(value: Value) -> Value {
    match value {
        Value::Object(mut map)
            if map.len() == 2 && map.contains_key("data") && map.contains_key("timestamp") =>
        {
            map.remove("data").unwrap_or(Value::Null)
        }
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ (Value::Object(_) | Value::Array(_))) => transform_value(parsed),
            _ => Value::String(s),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pattern() -> LegacyKeyPattern {
        LegacyKeyPattern::new("legacy:", "toolbox-v1:")
    }

    #[test]
    fn test_parse_keys() {
        let p = pattern();
        assert_eq!(
            p.parse("legacy:qr-generator"),
            Some(("qr-generator".to_string(), "main-data".to_string()))
        );
        assert_eq!(
            p.parse("toolbox-v1:todo-lists:list-1"),
            Some(("todo-lists".to_string(), "list-1".to_string()))
        );
        assert_eq!(p.parse("notes:a"), None);
        assert_eq!(p.parse("legacy:"), None);
        assert_eq!(p.parse("toolbox-v1:todo-lists"), None);
    }

    #[test]
    fn test_transform() {
        assert_eq!(
            transform_value(json!({"data": {"x": 1}, "timestamp": 5})),
            json!({"x": 1})
        );
        // an extra field means it is not an envelope
        let kept = json!({"data": 1, "timestamp": 5, "other": true});
        assert_eq!(transform_value(kept.clone()), kept);

        assert_eq!(transform_raw(r#"{"history":[1,2]}"#), json!({"history": [1, 2]}));
        assert_eq!(transform_raw("plain text"), json!("plain text"));
        assert_eq!(transform_raw("42"), json!(42));
        assert_eq!(transform_value(json!("[1,2]")), json!([1, 2]));
        assert_eq!(transform_value(json!("hello")), json!("hello"));
    }

    #[test]
    fn test_scan_ignores_store_namespace() {
        let entries = vec![
            ("legacy:qr-generator".to_string(), r#"{"history":[]}"#.to_string()),
            ("qr-generator:main-data".to_string(), "{}".to_string()),
        ];
        let items = pattern().scan(&entries);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source, FALLBACK_SOURCE);
        assert_eq!(items[0].value, json!({"history": []}));
    }
}
