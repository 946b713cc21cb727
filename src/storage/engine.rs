//! Primary medium: a versioned multi-store database directory
//!
//! Layout:
//!
//! ```text
//! <root>/<name>/
//!   manifest.json
//!   stores/<store>.log
//! ```
//!
//! Opening applies a [`SchemaRegistry`]: declared stores and indexes missing
//! from the manifest are created, nothing is dropped, and the manifest is
//! rewritten only when something changed. The medium is then probed by
//! creating and removing a scratch file.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use super::backend::{Medium, StorageBackend, StoreSnapshot};
use super::errors::{StorageError, StorageResult};
use super::log::StoreLog;
use super::manifest::{manifest_path, DatabaseManifest};
use super::record::Record;
use crate::observability::{log_event, Event};
use crate::schema::SchemaRegistry;

const STORES_DIR: &str = "stores";
const PROBE_FILE: &str = ".probe";

/// Default quota for the primary medium (50 MiB)
pub const DEFAULT_PRIMARY_QUOTA: u64 = 50 * 1024 * 1024;

/// Handle on an opened database
#[derive(Debug)]
pub struct StorageEngine {
    dir: PathBuf,
    manifest: DatabaseManifest,
    logs: BTreeMap<String, StoreLog>,
    quota: u64,
}

impl StorageEngine {
    /// Opens `<root>/<name>`, creating or upgrading it to match `registry`.
    ///
    /// Idempotent. Fails with a version conflict if the database on disk was
    /// written by a newer registry.
    pub fn open(root: &Path, name: &str, registry: &SchemaRegistry) -> StorageResult<Self> {
        let dir = root.join(name);
        fs::create_dir_all(dir.join(STORES_DIR)).map_err(|e| {
            StorageError::open_failed(format!("Failed to create database directory: {}", dir.display()), e)
        })?;

        let now = Utc::now().to_rfc3339();
        let path = manifest_path(&dir);
        let existing = DatabaseManifest::read_from_file(&path)?;
        let fresh = existing.is_none();
        let mut manifest = existing.unwrap_or_else(|| DatabaseManifest::new(name, &now));

        let outcome = manifest.apply(registry, &now)?;
        if fresh || outcome.changed(&manifest) {
            manifest.write_to_file(&path)?;
            let from = outcome.previous_version.to_string();
            let to = manifest.version.to_string();
            let created = outcome.created_stores.join(",");
            let indexes = outcome.created_indexes.join(",");
            log_event(
                Event::SchemaUpgraded,
                &[
                    ("database", name),
                    ("from_version", &from),
                    ("to_version", &to),
                    ("created_stores", &created),
                    ("created_indexes", &indexes),
                ],
            );
        }

        let engine = Self::open_logs(dir, manifest, false)?;
        engine.probe()?;

        let version = engine.manifest.version.to_string();
        let stores = engine.logs.len().to_string();
        log_event(
            Event::PrimaryOpened,
            &[("database", name), ("version", &version), ("stores", &stores)],
        );
        Ok(engine)
    }

    /// Opens an existing database read-only, without applying any schema.
    ///
    /// Returns `None` when no database of that name exists.
    pub fn open_existing(root: &Path, name: &str) -> StorageResult<Option<Self>> {
        let dir = root.join(name);
        match DatabaseManifest::read_from_file(&manifest_path(&dir))? {
            Some(manifest) => Self::open_logs(dir, manifest, true).map(Some),
            None => Ok(None),
        }
    }

    /// Returns whether a database of that name exists under `root`
    pub fn exists(root: &Path, name: &str) -> bool {
        manifest_path(&root.join(name)).exists()
    }

    fn open_logs(dir: PathBuf, manifest: DatabaseManifest, read_only: bool) -> StorageResult<Self> {
        let mut logs = BTreeMap::new();
        for definition in &manifest.stores {
            let path = dir.join(STORES_DIR).join(format!("{}.log", definition.name));
            let log = StoreLog::open(&path, definition.clone(), read_only)?;
            logs.insert(definition.name.clone(), log);
        }
        Ok(Self {
            dir,
            manifest,
            logs,
            quota: DEFAULT_PRIMARY_QUOTA,
        })
    }

    fn probe(&self) -> StorageResult<()> {
        let path = self.dir.join(PROBE_FILE);
        let result = File::create(&path)
            .and_then(|mut f| f.write_all(b"probe").and_then(|_| f.sync_all()))
            .and_then(|_| fs::remove_file(&path));
        result.map_err(|e| StorageError::open_failed("Storage probe failed", e))
    }

    /// Builder: set the byte quota
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = quota;
        self
    }

    fn log(&self, store: &str) -> StorageResult<&StoreLog> {
        self.logs.get(store).ok_or_else(|| StorageError::unknown_store(store))
    }

    fn log_mut(&mut self, store: &str) -> StorageResult<&mut StoreLog> {
        self.logs.get_mut(store).ok_or_else(|| StorageError::unknown_store(store))
    }

    /// Rewrites every store log without dead frames. Returns bytes reclaimed.
    pub fn compact(&mut self) -> StorageResult<u64> {
        let mut reclaimed = 0;
        for log in self.logs.values_mut() {
            reclaimed += log.compact()?;
        }
        let reclaimed_str = reclaimed.to_string();
        log_event(
            Event::CompactionComplete,
            &[("database", &self.manifest.name), ("reclaimed_bytes", &reclaimed_str)],
        );
        Ok(reclaimed)
    }
}

impl StorageBackend for StorageEngine {
    fn medium(&self) -> Medium {
        Medium::Primary
    }

    fn store_names(&self) -> Vec<String> {
        self.logs.keys().cloned().collect()
    }

    fn put(&mut self, store: &str, key: &str, payload: &Value) -> StorageResult<Record> {
        let budget = self.quota.saturating_sub(self.usage_bytes());
        let version = self.manifest.version;
        let now = Utc::now().timestamp_millis();
        self.log_mut(store)?.put(key, payload, version, now, budget)
    }

    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>> {
        let Some(frame) = self.log(store)?.get(key)? else {
            return Ok(None);
        };
        frame
            .to_record(store)
            .map(Some)
            .map_err(|reason| StorageError::corruption_for_record(store, key, reason))
    }

    fn delete(&mut self, store: &str, key: &str) -> StorageResult<bool> {
        let version = self.manifest.version;
        let now = Utc::now().timestamp_millis();
        self.log_mut(store)?.delete(key, version, now)
    }

    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>> {
        Ok(self.log(store)?.keys())
    }

    fn export_all(&self) -> StorageResult<StoreSnapshot> {
        let mut snapshot = StoreSnapshot::new();
        for (store, log) in &self.logs {
            let mut records = BTreeMap::new();
            for key in log.keys() {
                match self.get(store, &key) {
                    Ok(Some(record)) => {
                        records.insert(key, record);
                    }
                    Ok(None) => {}
                    Err(e) if e.is_corruption() => {
                        let reason = e.to_string();
                        log_event(
                            Event::CorruptionDetected,
                            &[("store", store), ("key", &key), ("reason", &reason)],
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            snapshot.insert(store.clone(), records);
        }
        Ok(snapshot)
    }

    fn clear_store(&mut self, store: &str) -> StorageResult<()> {
        self.log_mut(store)?.clear()
    }

    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<String>> {
        self.log(store)?
            .find(index, value)
            .ok_or_else(|| StorageError::unknown_index(store, index))
    }

    fn usage_bytes(&self) -> u64 {
        self.logs.values().map(StoreLog::size).sum()
    }

    fn quota_bytes(&self) -> u64 {
        self.quota
    }
}
