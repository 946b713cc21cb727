//! Portable bundle format
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "exportDate": "2026-01-01T00:00:00+00:00",
//!   "application": "toolbox",
//!   "tools": {"calculator-history": {"main": {"data": {...}, "timestamp": 1767225600000}}},
//!   "preferences": {"theme": "dark"},
//!   "metadata": {"totalSize": 123, "toolCount": 1, "exportFormat": "json"}
//! }
//! ```
//!
//! `tools` holds every tool store with at least one record. The built-in
//! `preferences` store is flattened into `preferences`, which is omitted when
//! an export filter leaves it out; `system` is never exported.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::errors::{TransferError, TransferResult};
use crate::schema::{is_reserved_store, PREFERENCES_STORE};
use crate::storage::StoreSnapshot;

/// Bundle version written by this crate
pub const BUNDLE_VERSION: &str = "1.0";

/// Major bundle version accepted on import
pub const SUPPORTED_MAJOR_VERSION: &str = "1";

pub const EXPORT_FORMAT: &str = "json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleEntry {
    pub data: Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    /// Byte length of the serialized `tools` and `preferences`
    pub total_size: u64,
    /// Number of stores in `tools`
    pub tool_count: usize,
    pub export_format: String,
}

/// Snapshot of some or all stores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub version: String,
    pub export_date: String,
    pub application: String,
    pub tools: BTreeMap<String, BTreeMap<String, BundleEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<BTreeMap<String, Value>>,
    pub metadata: BundleMetadata,
}

impl Bundle {
    /// Builds a bundle from exported records.
    ///
    /// With a filter, only the named stores are included; `preferences` is
    /// `None` unless the filter names it.
    pub fn from_snapshot(
        snapshot: &StoreSnapshot,
        application: &str,
        filter: Option<&BTreeSet<String>>,
    ) -> Self {
        let included = |store: &str| filter.map_or(true, |f| f.contains(store));

        let tools: BTreeMap<String, BTreeMap<String, BundleEntry>> = snapshot
            .iter()
            .filter(|(store, records)| {
                !is_reserved_store(store.as_str()) && !records.is_empty() && included(store.as_str())
            })
            .map(|(store, records)| {
                let entries = records
                    .iter()
                    .map(|(key, record)| {
                        (
                            key.clone(),
                            BundleEntry {
                                data: record.payload.clone(),
                                timestamp: record.timestamp,
                            },
                        )
                    })
                    .collect();
                (store.clone(), entries)
            })
            .collect();

        let preferences: Option<BTreeMap<String, Value>> = included(PREFERENCES_STORE).then(|| {
            snapshot
                .get(PREFERENCES_STORE)
                .map(|records| {
                    records
                        .iter()
                        .map(|(key, record)| (key.clone(), record.payload.clone()))
                        .collect()
                })
                .unwrap_or_default()
        });

        let total_size = serialized_len(&tools) + preferences.as_ref().map_or(0, serialized_len);
        let tool_count = tools.len();
        Self {
            version: BUNDLE_VERSION.to_string(),
            export_date: Utc::now().to_rfc3339(),
            application: application.to_string(),
            tools,
            preferences,
            metadata: BundleMetadata {
                total_size,
                tool_count,
                export_format: EXPORT_FORMAT.to_string(),
            },
        }
    }

    /// Total number of tool records
    pub fn record_count(&self) -> usize {
        self.tools.values().map(BTreeMap::len).sum()
    }

    /// Writes the bundle as pretty JSON with fsync
    pub fn write_to_file(&self, path: &Path) -> TransferResult<()> {
        let json = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| TransferError::io(parent, e))?;
            }
        }

        let mut file = File::create(path).map_err(|e| TransferError::io(path, e))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| TransferError::io(path, e))?;
        Ok(())
    }

    /// Bundle as a JSON value, the shape import accepts
    pub fn to_value(&self) -> TransferResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn serialized_len<T: Serialize>(value: &T) -> u64 {
    serde_json::to_vec(value).map_or(0, |bytes| bytes.len() as u64)
}

/// Reads a bundle file as raw JSON; validation happens on import
pub fn read_bundle_file(path: &Path) -> TransferResult<Value> {
    let contents = fs::read_to_string(path).map_err(|e| TransferError::io(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Bundle contents that passed validation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatedBundle {
    /// store -> key -> data
    pub tools: BTreeMap<String, BTreeMap<String, Value>>,
    /// `None` when the bundle has no `preferences` field
    pub preferences: Option<BTreeMap<String, Value>>,
}

impl ValidatedBundle {
    pub fn record_count(&self) -> usize {
        self.tools.values().map(BTreeMap::len).sum::<usize>()
            + self.preferences.as_ref().map_or(0, BTreeMap::len)
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> TransferResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| TransferError::invalid(format!("{} must be an object", what)))
}

/// Checks the whole bundle before anything is written.
///
/// Requires a non-empty string `version` with major version 1 and an object
/// `tools` whose stores are objects of `{data, timestamp?}` entries.
/// `preferences` is optional but must be an object when present.
pub fn validate(value: &Value) -> TransferResult<ValidatedBundle> {
    let root = as_object(value, "bundle")?;

    let version = match root.get("version") {
        None | Some(Value::Null) => return Err(TransferError::invalid("missing field 'version'")),
        Some(Value::String(v)) if !v.trim().is_empty() => v.trim(),
        Some(_) => return Err(TransferError::invalid("'version' must be a non-empty string")),
    };
    let major = version.split('.').next().unwrap_or_default();
    if major != SUPPORTED_MAJOR_VERSION {
        return Err(TransferError::invalid(format!("unsupported bundle version '{}'", version)));
    }

    let tools = match root.get("tools") {
        None | Some(Value::Null) => return Err(TransferError::invalid("missing field 'tools'")),
        Some(tools) => as_object(tools, "'tools'")?,
    };

    let mut validated = ValidatedBundle::default();
    for (store, entries) in tools {
        let entries = as_object(entries, &format!("tools.{}", store))?;
        let mut records = BTreeMap::new();
        for (key, entry) in entries {
            let entry = as_object(entry, &format!("tools.{}.{}", store, key))?;
            let data = entry.get("data").ok_or_else(|| {
                TransferError::invalid(format!("tools.{}.{} is missing 'data'", store, key))
            })?;
            if let Some(ts) = entry.get("timestamp") {
                if !ts.is_number() && !ts.is_null() {
                    return Err(TransferError::invalid(format!(
                        "tools.{}.{}.timestamp must be a number",
                        store, key
                    )));
                }
            }
            records.insert(key.clone(), data.clone());
        }
        validated.tools.insert(store.clone(), records);
    }

    validated.preferences = match root.get("preferences") {
        None | Some(Value::Null) => None,
        Some(prefs) => Some(
            as_object(prefs, "'preferences'")?
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
    };

    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Record;
    use serde_json::json;
    use tempfile::TempDir;

    fn snapshot() -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        let mut calc = BTreeMap::new();
        calc.insert(
            "main".to_string(),
            Record::new("calculator-history", "main", json!({"expr": "2+2", "result": 4}), 10, 1),
        );
        snapshot.insert("calculator-history".into(), calc);
        snapshot.insert("todo-lists".into(), BTreeMap::new());

        let mut prefs = BTreeMap::new();
        prefs.insert("theme".to_string(), Record::new("preferences", "theme", json!("dark"), 11, 1));
        snapshot.insert("preferences".into(), prefs);

        let mut system = BTreeMap::new();
        system.insert("migration-state".to_string(), Record::new("system", "migration-state", json!({}), 12, 1));
        snapshot.insert("system".into(), system);
        snapshot
    }

    #[test]
    fn test_from_snapshot_shapes_bundle() {
        let bundle = Bundle::from_snapshot(&snapshot(), "toolbox", None);
        assert_eq!(bundle.version, "1.0");
        assert_eq!(bundle.metadata.export_format, "json");
        assert_eq!(bundle.metadata.tool_count, 1);
        assert_eq!(bundle.metadata.tool_count, bundle.tools.len());
        assert!(!bundle.tools.contains_key("todo-lists"));
        assert!(!bundle.tools.contains_key("system"));
        let preferences = bundle.preferences.as_ref().unwrap();
        assert_eq!(preferences["theme"], json!("dark"));
        assert_eq!(bundle.tools["calculator-history"]["main"].timestamp, 10);

        let expected = serde_json::to_vec(&bundle.tools).unwrap().len()
            + serde_json::to_vec(preferences).unwrap().len();
        assert_eq!(bundle.metadata.total_size, expected as u64);
    }

    #[test]
    fn test_empty_snapshot() {
        let bundle = Bundle::from_snapshot(&StoreSnapshot::new(), "toolbox", None);
        assert_eq!(bundle.metadata.tool_count, 0);
        assert!(bundle.tools.is_empty());
        let value = bundle.to_value().unwrap();
        assert_eq!(value["tools"], json!({}));
        assert_eq!(value["metadata"]["toolCount"], 0);
    }

    #[test]
    fn test_filter_excludes_preferences() {
        let filter: BTreeSet<String> = ["calculator-history".to_string()].into();
        let bundle = Bundle::from_snapshot(&snapshot(), "toolbox", Some(&filter));
        assert_eq!(bundle.tools.len(), 1);
        assert!(bundle.preferences.is_none());

        let value = bundle.to_value().unwrap();
        assert!(value.get("preferences").is_none());
        assert!(validate(&value).unwrap().preferences.is_none());
    }

    #[test]
    fn test_validate_accepts_exported_bundle() {
        let bundle = Bundle::from_snapshot(&snapshot(), "toolbox", None);
        let validated = validate(&bundle.to_value().unwrap()).unwrap();
        assert_eq!(validated.tools["calculator-history"]["main"], json!({"expr": "2+2", "result": 4}));
        assert_eq!(validated.record_count(), 2);
    }

    #[test]
    fn test_validate_rejections() {
        let cases = [
            json!([]),
            json!({"tools": {}}),
            json!({"version": "", "tools": {}}),
            json!({"version": 1, "tools": {}}),
            json!({"version": "2.0", "tools": {}}),
            json!({"version": "1.0"}),
            json!({"version": "1.0", "tools": []}),
            json!({"version": "1.0", "tools": {"notes": []}}),
            json!({"version": "1.0", "tools": {"notes": {"a": {"timestamp": 1}}}}),
            json!({"version": "1.0", "tools": {"notes": {"a": {"data": 1, "timestamp": "x"}}}}),
            json!({"version": "1.0", "tools": {}, "preferences": 3}),
        ];
        for case in cases {
            let err = validate(&case).unwrap_err();
            assert!(err.is_rejection(), "{} should be rejected", case);
        }
    }

    #[test]
    fn test_validate_minimal_bundle() {
        let validated = validate(&json!({"version": "1.2", "tools": {"notes": {"a": {"data": null}}}})).unwrap();
        assert_eq!(validated.tools["notes"]["a"], Value::Null);
        assert!(validated.preferences.is_none());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("exports").join("bundle.json");
        let bundle = Bundle::from_snapshot(&snapshot(), "toolbox", None);
        bundle.write_to_file(&path).unwrap();

        let value = read_bundle_file(&path).unwrap();
        let read: Bundle = serde_json::from_value(value).unwrap();
        assert_eq!(read, bundle);
    }
}
