//! Secondary medium: one flat key-value file
//!
//! The whole map is kept in memory and rewritten to `fallback.json` (temp
//! file + fsync + rename) on every mutation. Tool records live under
//! `store:key` as a JSON envelope; any other key is raw data left by earlier
//! generations of the storage layer and is only reachable through the raw
//! accessors.
//!
//! While the session runs without the primary medium, deletes and store
//! clears also leave a tombstone (`!deleted:store:key`, `!cleared:store`)
//! holding the time of the delete, so they can be replayed onto the primary
//! medium once it is back.
//!
//! The serialized file may not exceed the quota. A mutation that would push
//! it over is rolled back and reported as `QuotaExceeded`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::{Medium, StorageBackend, StoreSnapshot};
use super::errors::{StorageError, StorageResult};
use super::record::Record;
use crate::integrity;
use crate::observability::{log_event, Event};
use crate::schema::{SchemaRegistry, StoreDefinition};

/// Default quota for the fallback medium (5 MiB)
pub const DEFAULT_FALLBACK_QUOTA: u64 = 5 * 1024 * 1024;

/// File name of the fallback medium under the data directory
pub const FALLBACK_FILE: &str = "fallback.json";

const DELETED_PREFIX: &str = "!deleted:";
const CLEARED_PREFIX: &str = "!cleared:";

/// A delete made on the fallback medium that the primary has not seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub store: String,
    /// `None` when the whole store was cleared
    pub key: Option<String>,
    pub timestamp: i64,
}

/// Envelope stored under `store:key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackEntry {
    pub data: Value,
    pub timestamp: i64,
    pub checksum: String,
    pub schema_version: u32,
}

/// Namespaced key for a store record
pub fn namespaced_key(store: &str, key: &str) -> String {
    format!("{}:{}", store, key)
}

#[derive(Debug)]
pub struct FallbackStore {
    path: PathBuf,
    quota: u64,
    schema_version: u32,
    stores: BTreeMap<String, StoreDefinition>,
    entries: BTreeMap<String, String>,
    usage: u64,
}

impl FallbackStore {
    /// Loads `path` if present. An unreadable or malformed file is logged
    /// and the store starts empty; the bad file is replaced on first write.
    pub fn open(path: &Path, quota: u64, registry: &SchemaRegistry) -> Self {
        let entries = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<String, String>>(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    let reason = format!("Fallback file is not a string map: {}", e);
                    log_event(Event::ReadFailed, &[("medium", "fallback"), ("reason", &reason)]);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                let reason = e.to_string();
                log_event(Event::ReadFailed, &[("medium", "fallback"), ("reason", &reason)]);
                BTreeMap::new()
            }
        };

        let mut store = Self {
            path: path.to_path_buf(),
            quota,
            schema_version: registry.version(),
            stores: registry
                .stores()
                .map(|s| (s.name.clone(), s.clone()))
                .collect(),
            entries,
            usage: 0,
        };
        store.usage = store.serialize().map_or(0, |b| b.len() as u64);
        store
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn serialize(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(&self.entries).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to serialize fallback store: {}", e),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    fn persist(&mut self) -> StorageResult<()> {
        let bytes = self.serialize()?;
        if bytes.len() as u64 > self.quota {
            return Err(StorageError::quota_exceeded(bytes.len() as u64, self.quota));
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        };
        write().map_err(|e| {
            StorageError::write_failed(format!("Failed to write fallback store: {}", self.path.display()), e)
        })?;

        self.usage = bytes.len() as u64;
        Ok(())
    }

    /// Applies `mutate` and persists, restoring the previous map on failure
    fn mutate<T>(&mut self, mutate: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> StorageResult<T> {
        let previous = self.entries.clone();
        let result = mutate(&mut self.entries);
        if let Err(e) = self.persist() {
            self.entries = previous;
            return Err(e);
        }
        Ok(result)
    }

    /// Raw value under a flat key
    pub fn get_raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Stores a raw value under a flat key
    pub fn set_raw(&mut self, key: &str, value: String) -> StorageResult<()> {
        let key = key.to_string();
        self.mutate(move |entries| {
            entries.insert(key, value);
        })
    }

    /// Removes a flat key. Returns `false` if it was absent.
    pub fn remove_raw(&mut self, key: &str) -> StorageResult<bool> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        self.mutate(|entries| entries.remove(key).is_some())
    }

    /// Every flat key, ordered
    pub fn raw_keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Deletes a record and leaves a tombstone for the primary medium
    pub fn delete_tracked(&mut self, store: &str, key: &str) -> StorageResult<bool> {
        self.definition(store)?;
        let record_key = namespaced_key(store, key);
        let tombstone_key = format!("{}{}", DELETED_PREFIX, record_key);
        let stamp = Utc::now().timestamp_millis().to_string();
        self.mutate(move |entries| {
            entries.insert(tombstone_key, stamp);
            entries.remove(&record_key).is_some()
        })
    }

    /// Clears a store and leaves a store tombstone for the primary medium.
    /// Key tombstones of that store are subsumed by it.
    pub fn clear_store_tracked(&mut self, store: &str) -> StorageResult<()> {
        self.definition(store)?;
        let prefix = format!("{}:", store);
        let deleted_prefix = format!("{}{}", DELETED_PREFIX, prefix);
        let marker = format!("{}{}", CLEARED_PREFIX, store);
        let stamp = Utc::now().timestamp_millis().to_string();
        self.mutate(move |entries| {
            entries.retain(|k, _| !k.starts_with(&prefix) && !k.starts_with(&deleted_prefix));
            entries.insert(marker, stamp);
        })
    }

    /// Pending tombstones, store clears first
    pub fn tombstones(&self) -> Vec<Tombstone> {
        let mut cleared = Vec::new();
        let mut deleted = Vec::new();
        for (raw_key, raw_value) in &self.entries {
            let Ok(timestamp) = raw_value.parse::<i64>() else {
                continue;
            };
            if let Some(store) = raw_key.strip_prefix(CLEARED_PREFIX) {
                cleared.push(Tombstone {
                    store: store.to_string(),
                    key: None,
                    timestamp,
                });
            } else if let Some((store, key)) = raw_key
                .strip_prefix(DELETED_PREFIX)
                .and_then(|rest| rest.split_once(':'))
            {
                deleted.push(Tombstone {
                    store: store.to_string(),
                    key: Some(key.to_string()),
                    timestamp,
                });
            }
        }
        cleared.extend(deleted);
        cleared
    }

    fn is_tracked(&self, raw_key: &str) -> bool {
        raw_key.starts_with(DELETED_PREFIX)
            || raw_key.starts_with(CLEARED_PREFIX)
            || raw_key
                .split_once(':')
                .map_or(false, |(store, _)| self.stores.contains_key(store))
    }

    /// Drops every store record and tombstone. Raw keys of earlier storage
    /// generations are kept.
    pub fn discard_tracked(&mut self) -> StorageResult<()> {
        let tracked: Vec<String> = self
            .entries
            .keys()
            .filter(|k| self.is_tracked(k))
            .cloned()
            .collect();
        if tracked.is_empty() {
            return Ok(());
        }
        self.mutate(move |entries| {
            for key in &tracked {
                entries.remove(key);
            }
        })
    }

    fn definition(&self, store: &str) -> StorageResult<&StoreDefinition> {
        self.stores.get(store).ok_or_else(|| StorageError::unknown_store(store))
    }

    fn store_keys<'a>(&'a self, store: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{}:", store);
        self.entries
            .range(prefix.clone()..)
            .map(|(k, _)| k.as_str())
            .take_while(move |k| k.starts_with(&prefix))
            .map(move |k| &k[store_prefix_len(k)..])
    }

    fn entry(&self, store: &str, key: &str) -> StorageResult<Option<FallbackEntry>> {
        let Some(raw) = self.get_raw(&namespaced_key(store, key)) else {
            return Ok(None);
        };
        let entry: FallbackEntry = serde_json::from_str(raw).map_err(|e| {
            StorageError::corruption_for_record(store, key, format!("Malformed fallback entry: {}", e))
        })?;
        if !integrity::verify(&entry.data, &entry.checksum) {
            return Err(StorageError::corruption_for_record(
                store,
                key,
                format!(
                    "Checksum mismatch: stored {}, computed {}",
                    entry.checksum,
                    integrity::hash(&entry.data)
                ),
            ));
        }
        Ok(Some(entry))
    }
}

/// Length of the `store:` prefix of a namespaced key
fn store_prefix_len(key: &str) -> usize {
    key.find(':').map_or(0, |i| i + 1)
}

impl StorageBackend for FallbackStore {
    fn medium(&self) -> Medium {
        Medium::Fallback
    }

    fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    fn put(&mut self, store: &str, key: &str, payload: &Value) -> StorageResult<Record> {
        self.definition(store)?;
        let now = Utc::now().timestamp_millis();
        // A damaged previous entry does not block overwriting it
        let previous = self.entry(store, key).ok().flatten().map(|e| e.timestamp);
        let timestamp = previous.map_or(now, |p| now.max(p));

        let record = Record::new(store, key, payload.clone(), timestamp, self.schema_version);
        let envelope = FallbackEntry {
            data: payload.clone(),
            timestamp,
            checksum: record.checksum.clone(),
            schema_version: self.schema_version,
        };
        let raw = serde_json::to_string(&envelope).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to serialize record: {}", e),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })?;
        let record_key = namespaced_key(store, key);
        let tombstone_key = format!("{}{}", DELETED_PREFIX, record_key);
        self.mutate(move |entries| {
            entries.remove(&tombstone_key);
            entries.insert(record_key, raw);
        })?;
        Ok(record)
    }

    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>> {
        self.definition(store)?;
        Ok(self.entry(store, key)?.map(|entry| Record {
            id: key.to_string(),
            store: store.to_string(),
            payload: entry.data,
            timestamp: entry.timestamp,
            checksum: entry.checksum,
            schema_version: entry.schema_version,
            synced: false,
        }))
    }

    fn delete(&mut self, store: &str, key: &str) -> StorageResult<bool> {
        self.definition(store)?;
        self.remove_raw(&namespaced_key(store, key))
    }

    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>> {
        self.definition(store)?;
        Ok(self.store_keys(store).map(str::to_string).collect())
    }

    fn export_all(&self) -> StorageResult<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::new();
        for store in self.stores.keys() {
            let mut records = BTreeMap::new();
            for key in self.store_keys(store) {
                match self.get(store, key) {
                    Ok(Some(record)) => {
                        records.insert(key.to_string(), record);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let reason = e.to_string();
                        log_event(
                            Event::CorruptionDetected,
                            &[("store", store), ("key", key), ("reason", &reason)],
                        );
                    }
                }
            }
            snapshot.insert(store.clone(), records);
        }
        Ok(snapshot)
    }

    fn clear_store(&mut self, store: &str) -> StorageResult<()> {
        self.definition(store)?;
        let prefix = format!("{}:", store);
        self.mutate(|entries| entries.retain(|k, _| !k.starts_with(&prefix)))
    }

    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<String>> {
        let definition = self.definition(store)?;
        let index = definition
            .index(index)
            .ok_or_else(|| StorageError::unknown_index(store, index))?;

        let mut keys = Vec::new();
        for key in self.store_keys(store) {
            if let Ok(Some(entry)) = self.entry(store, key) {
                if index.extract(&entry.data) == Some(value) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    fn usage_bytes(&self) -> u64 {
        self.usage
    }

    fn quota_bytes(&self) -> u64 {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::IndexDefinition;
    use crate::storage::errors::StorageErrorCode;
    use serde_json::json;
    use tempfile::TempDir;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::with_stores(1, ["qr-generator"]).unwrap();
        registry
            .register(StoreDefinition::new("notes").with_index(IndexDefinition::new("by_tag", "tag")))
            .unwrap();
        registry
    }

    fn open(dir: &TempDir) -> FallbackStore {
        FallbackStore::open(&dir.path().join(FALLBACK_FILE), DEFAULT_FALLBACK_QUOTA, &registry())
    }

    #[test]
    fn test_put_get_persists() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = open(&dir);
            store.put("notes", "a", &json!({"text": "hi"})).unwrap();
        }
        let store = open(&dir);
        let record = store.get("notes", "a").unwrap().unwrap();
        assert_eq!(record.payload, json!({"text": "hi"}));
        assert!(record.verify());
        assert!(store.get_raw("notes:a").is_some());
    }

    #[test]
    fn test_keys_are_namespaced() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "b", &json!(1)).unwrap();
        store.put("notes", "a", &json!(2)).unwrap();
        store.put("qr-generator", "a", &json!(3)).unwrap();
        store.set_raw("legacy:qr-generator", "{}".into()).unwrap();

        assert_eq!(store.list_keys("notes").unwrap(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(store.list_keys("qr-generator").unwrap(), vec!["a".to_string()]);
        let snapshot = store.export_all().unwrap();
        assert_eq!(snapshot["notes"].len(), 2);
        assert!(!snapshot.contains_key("legacy"));
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "a", &json!({"text": "hi"})).unwrap();

        let tampered = store.get_raw("notes:a").unwrap().replace("hi", "ho");
        store.set_raw("notes:a", tampered).unwrap();

        let err = store.get("notes", "a").unwrap_err();
        assert!(err.is_corruption());
        assert!(store.export_all().unwrap()["notes"].is_empty());
    }

    #[test]
    fn test_quota_rolls_back() {
        let dir = TempDir::new().unwrap();
        let mut store =
            FallbackStore::open(&dir.path().join(FALLBACK_FILE), 200, &registry());
        store.put("notes", "small", &json!(1)).unwrap();

        let err = store.put("notes", "big", &json!("x".repeat(500))).unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::QuotaExceeded);
        assert!(store.get("notes", "big").unwrap().is_none());
        assert!(store.get("notes", "small").unwrap().is_some());
    }

    #[test]
    fn test_malformed_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(FALLBACK_FILE), b"{not json").unwrap();
        let mut store = open(&dir);
        assert!(store.raw_keys().is_empty());
        store.put("notes", "a", &json!(1)).unwrap();
        assert_eq!(open(&dir).list_keys("notes").unwrap(), vec!["a".to_string()]);
    }

    #[test]
    fn test_delete_and_clear_store() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "a", &json!(1)).unwrap();
        store.put("qr-generator", "a", &json!(2)).unwrap();
        store.set_raw("legacy:notes", "[]".into()).unwrap();

        assert!(store.delete("notes", "a").unwrap());
        assert!(!store.delete("notes", "a").unwrap());

        store.clear_all().unwrap();
        assert!(store.list_keys("qr-generator").unwrap().is_empty());
        // Raw legacy data is outside every store namespace
        assert_eq!(store.get_raw("legacy:notes"), Some("[]"));
    }

    #[test]
    fn test_tracked_deletes_leave_tombstones() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "a", &json!(1)).unwrap();
        store.put("qr-generator", "main-data", &json!({"history": []})).unwrap();

        assert!(store.delete_tracked("notes", "a").unwrap());
        assert!(!store.delete_tracked("notes", "never").unwrap());
        store.clear_store_tracked("qr-generator").unwrap();

        let tombstones = open(&dir).tombstones();
        assert_eq!(tombstones.len(), 3);
        assert_eq!(tombstones[0].store, "qr-generator");
        assert_eq!(tombstones[0].key, None);
        let keys: Vec<_> = tombstones[1..].iter().map(|t| t.key.clone().unwrap()).collect();
        assert_eq!(keys, vec!["a".to_string(), "never".to_string()]);

        // Tombstones are not records
        assert!(store.list_keys("notes").unwrap().is_empty());
        assert!(store.export_all().unwrap()["notes"].is_empty());
    }

    #[test]
    fn test_put_supersedes_tombstone() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.delete_tracked("notes", "a").unwrap();
        store.put("notes", "a", &json!("back")).unwrap();
        assert!(store.tombstones().is_empty());
    }

    #[test]
    fn test_discard_tracked_keeps_legacy_keys() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "a", &json!(1)).unwrap();
        store.delete_tracked("notes", "b").unwrap();
        store.set_raw("legacy:notes", "[]".into()).unwrap();

        store.discard_tracked().unwrap();
        assert_eq!(store.raw_keys(), vec!["legacy:notes".to_string()]);
        assert!(open(&dir).tombstones().is_empty());
    }

    #[test]
    fn test_float_payload_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let payload = json!({"v": 1.0715660391465826e-75, "w": 0.1 + 0.2});
        {
            let mut store = open(&dir);
            store.put("notes", "f", &payload).unwrap();
            assert_eq!(store.get("notes", "f").unwrap().unwrap().payload, payload);
        }
        let record = open(&dir).get("notes", "f").unwrap().unwrap();
        assert_eq!(record.payload, payload);
        assert!(record.verify());
    }

    #[test]
    fn test_find_by_index_scans() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        store.put("notes", "a", &json!({"tag": "work"})).unwrap();
        store.put("notes", "b", &json!({"tag": "home"})).unwrap();

        assert_eq!(
            store.find_by_index("notes", "by_tag", &json!("work")).unwrap(),
            vec!["a".to_string()]
        );
        assert!(store.find_by_index("notes", "missing", &json!(1)).is_err());
    }

    #[test]
    fn test_unknown_store() {
        let dir = TempDir::new().unwrap();
        let mut store = open(&dir);
        let err = store.put("nope", "a", &json!(1)).unwrap_err();
        assert_eq!(err.code(), StorageErrorCode::UnknownStore);
    }
}
