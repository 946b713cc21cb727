//! The data facade
//!
//! Every call locks the media for the duration of one operation, tries the
//! primary medium, and falls back as described in the module docs. Nothing
//! here returns an error: failures end in `false`, `None` or an empty value,
//! plus a log line and a counter.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use super::notify::{LogNotifier, Notifier};
use crate::config::StoreConfig;
use crate::observability::{log_event, Event, MetricsRegistry};
use crate::schema::{SchemaRegistry, SYSTEM_STORE};
use crate::storage::{
    reconcile, FallbackStore, Medium, Record, StorageBackend, StorageEngine, StorageError,
    StorageErrorCode, StorageInfo, StorageResult, StoreSnapshot, FALLBACK_FILE,
};
use crate::transfer::Bundle;

/// Result of [`DataFacade::compare_and_swap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Current value matched and the new value was written
    Swapped,
    /// Current value did not match; nothing written
    Conflict,
    /// Current value matched but the write failed on every medium
    Failed,
}

/// Both media. `primary` is dropped for good once the session falls back.
#[derive(Debug)]
struct Media {
    primary: Option<StorageEngine>,
    fallback: FallbackStore,
}

impl Media {
    fn medium(&self) -> Medium {
        if self.primary.is_some() {
            Medium::Primary
        } else {
            Medium::Fallback
        }
    }

    fn active(&self) -> &dyn StorageBackend {
        match &self.primary {
            Some(primary) => primary as &dyn StorageBackend,
            None => &self.fallback,
        }
    }

    fn activate_fallback(&mut self, error: &StorageError, metrics: &MetricsRegistry) {
        if self.primary.take().is_some() {
            let reason = error.to_string();
            log_event(
                Event::FallbackActivated,
                &[("code", error.code().code()), ("reason", &reason)],
            );
            metrics.increment_fallback_activations();
        }
    }

    /// Replays writes an earlier fallback session left behind. A medium
    /// failure during replay sends this session to the fallback medium too.
    fn reconcile(&mut self, metrics: &MetricsRegistry) {
        let Some(primary) = self.primary.as_mut() else {
            return;
        };
        match reconcile(primary, &mut self.fallback) {
            Ok(stats) if stats.is_empty() => {}
            Ok(stats) => {
                let applied = stats.records_applied.to_string();
                let superseded = stats.records_superseded.to_string();
                let deletes = stats.deletes_applied.to_string();
                log_event(
                    Event::FallbackReconciled,
                    &[
                        ("records_applied", &applied),
                        ("records_superseded", &superseded),
                        ("deletes_applied", &deletes),
                    ],
                );
            }
            Err(e) => {
                log_storage_error(Event::WriteFailed, Medium::Primary, "*", "*", &e);
                if e.is_medium_failure() {
                    self.activate_fallback(&e, metrics);
                }
            }
        }
    }

    /// Deletes from the fallback medium, leaving a tombstone when the
    /// primary medium is gone
    fn delete_fallback(&mut self, store: &str, key: &str) -> StorageResult<bool> {
        if self.primary.is_some() {
            self.fallback.delete(store, key)
        } else {
            self.fallback.delete_tracked(store, key)
        }
    }
}

fn log_storage_error(event: Event, medium: Medium, store: &str, key: &str, error: &StorageError) {
    let reason = error.to_string();
    log_event(
        event,
        &[
            ("medium", medium.as_str()),
            ("store", store),
            ("key", key),
            ("code", error.code().code()),
            ("reason", &reason),
        ],
    );
}

/// Single entry point for tool state
#[derive(Debug)]
pub struct DataFacade {
    media: Mutex<Media>,
    registry: SchemaRegistry,
    data_dir: PathBuf,
    application: String,
    metrics: Arc<MetricsRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl DataFacade {
    /// Opens both media and selects the active one.
    ///
    /// Never fails: if the primary medium cannot be opened, the whole
    /// session runs on the fallback medium.
    pub fn open(config: &StoreConfig, registry: SchemaRegistry) -> Self {
        let metrics = Arc::new(MetricsRegistry::new());

        if let Err(e) = fs::create_dir_all(&config.data_dir) {
            let reason = e.to_string();
            log_event(Event::WriteFailed, &[("medium", "fallback"), ("reason", &reason)]);
        }
        let fallback = FallbackStore::open(
            &config.data_dir.join(FALLBACK_FILE),
            config.fallback_quota_bytes,
            &registry,
        );

        let primary = match StorageEngine::open(&config.data_dir, &config.database_name, &registry) {
            Ok(engine) => Some(engine.with_quota(config.quota_bytes)),
            Err(e) => {
                let reason = e.to_string();
                log_event(
                    Event::PrimaryOpenFailed,
                    &[("code", e.code().code()), ("reason", &reason)],
                );
                log_event(Event::FallbackActivated, &[("code", e.code().code()), ("reason", &reason)]);
                metrics.increment_fallback_activations();
                None
            }
        };

        let mut media = Media { primary, fallback };
        media.reconcile(&metrics);

        Self {
            media: Mutex::new(media),
            registry,
            data_dir: config.data_dir.clone(),
            application: config.application.clone(),
            metrics,
            notifier: Arc::new(LogNotifier),
        }
    }

    /// Builder: route user-facing notifications to `notifier`
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Application name recorded in bundles
    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Medium currently serving requests
    pub async fn active_medium(&self) -> Medium {
        self.media.lock().await.medium()
    }

    // ---------------------------------------------------------------------
    // Locked helpers
    // ---------------------------------------------------------------------

    fn put_locked(&self, media: &mut Media, store: &str, key: &str, data: &Value) -> StorageResult<Record> {
        if let Some(primary) = media.primary.as_mut() {
            match primary.put(store, key, data) {
                Ok(record) => return Ok(record),
                Err(e) if e.is_medium_failure() => {
                    log_storage_error(Event::WriteFailed, Medium::Primary, store, key, &e);
                    media.activate_fallback(&e, &self.metrics);
                }
                Err(e) => {
                    log_storage_error(Event::WriteFailed, Medium::Primary, store, key, &e);
                    return Err(e);
                }
            }
        }

        self.metrics.increment_fallback_operations();
        media.fallback.put(store, key, data).map_err(|e| {
            log_storage_error(Event::WriteFailed, Medium::Fallback, store, key, &e);
            e
        })
    }

    fn read_locked(&self, media: &mut Media, store: &str, key: &str) -> Option<Value> {
        if let Some(primary) = media.primary.as_ref() {
            match primary.get(store, key) {
                Ok(Some(record)) => return Some(record.payload),
                Ok(None) => {}
                Err(e) if e.is_corruption() => {
                    log_storage_error(Event::CorruptionDetected, Medium::Primary, store, key, &e);
                    self.metrics.increment_corruptions();
                }
                Err(e) if e.is_medium_failure() => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, store, key, &e);
                    media.activate_fallback(&e, &self.metrics);
                }
                Err(e) => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, store, key, &e);
                }
            }
        }

        let serving = media.primary.is_none();
        match media.fallback.get(store, key) {
            Ok(record) => {
                if serving || record.is_some() {
                    self.metrics.increment_fallback_operations();
                }
                record.map(|r| r.payload)
            }
            Err(e) => {
                self.metrics.increment_fallback_operations();
                if e.is_corruption() {
                    log_storage_error(Event::CorruptionDetected, Medium::Fallback, store, key, &e);
                    self.metrics.increment_corruptions();
                } else {
                    log_storage_error(Event::ReadFailed, Medium::Fallback, store, key, &e);
                }
                None
            }
        }
    }

    // ---------------------------------------------------------------------
    // Tool-facing operations
    // ---------------------------------------------------------------------

    /// Stores `data` under `store`/`key`. Returns whether any medium took it.
    pub async fn save_data(&self, store: &str, key: &str, data: Value) -> bool {
        let mut media = self.media.lock().await;
        match self.put_locked(&mut media, store, key, &data) {
            Ok(_) => {
                self.metrics.increment_saves();
                true
            }
            Err(_) => {
                self.metrics.increment_save_failures();
                false
            }
        }
    }

    /// Loads a payload, consulting the fallback on a primary miss or failure
    pub async fn load_data(&self, store: &str, key: &str) -> Option<Value> {
        let mut media = self.media.lock().await;
        self.metrics.increment_loads();
        let value = self.read_locked(&mut media, store, key);
        if value.is_none() {
            self.metrics.increment_load_misses();
        }
        value
    }

    /// Removes a key from the active medium and any fallback copy
    pub async fn delete_data(&self, store: &str, key: &str) -> bool {
        let mut media = self.media.lock().await;

        let mut primary_ok = None;
        if let Some(primary) = media.primary.as_mut() {
            match primary.delete(store, key) {
                Ok(_) => primary_ok = Some(true),
                Err(e) if e.is_medium_failure() => {
                    log_storage_error(Event::WriteFailed, Medium::Primary, store, key, &e);
                    media.activate_fallback(&e, &self.metrics);
                }
                Err(e) => {
                    log_storage_error(Event::WriteFailed, Medium::Primary, store, key, &e);
                    return false;
                }
            }
        }

        let fallback_result = media.delete_fallback(store, key);
        let deleted = match (primary_ok, fallback_result) {
            (Some(ok), Ok(_)) => ok,
            (Some(ok), Err(e)) => {
                // Stores only the primary knows about have no fallback namespace
                if e.code() != StorageErrorCode::UnknownStore {
                    log_storage_error(Event::WriteFailed, Medium::Fallback, store, key, &e);
                }
                ok
            }
            (None, Ok(_)) => {
                self.metrics.increment_fallback_operations();
                true
            }
            (None, Err(e)) => {
                log_storage_error(Event::WriteFailed, Medium::Fallback, store, key, &e);
                false
            }
        };
        if deleted {
            self.metrics.increment_deletes();
        }
        deleted
    }

    /// Keys of a store across both media, sorted
    pub async fn get_all_keys(&self, store: &str) -> Vec<String> {
        let mut media = self.media.lock().await;
        let mut keys = BTreeSet::new();

        if let Some(primary) = media.primary.as_ref() {
            match primary.list_keys(store) {
                Ok(found) => keys.extend(found),
                Err(e) => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, store, "*", &e);
                    if e.is_medium_failure() {
                        media.activate_fallback(&e, &self.metrics);
                    }
                }
            }
        }
        if let Ok(found) = media.fallback.list_keys(store) {
            keys.extend(found);
        }
        keys.into_iter().collect()
    }

    /// Every verified record, primary first, overlaid with fallback-only records
    pub async fn export_records(&self) -> StoreSnapshot {
        let mut media = self.media.lock().await;
        let mut snapshot = StoreSnapshot::new();

        if let Some(primary) = media.primary.as_ref() {
            match primary.export_all() {
                Ok(records) => snapshot = records,
                Err(e) => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, "*", "*", &e);
                    if e.is_medium_failure() {
                        media.activate_fallback(&e, &self.metrics);
                    }
                }
            }
        }

        match media.fallback.export_all() {
            Ok(fallback) => {
                for (store, records) in fallback {
                    let target = snapshot.entry(store).or_insert_with(BTreeMap::new);
                    for (key, record) in records {
                        target.entry(key).or_insert(record);
                    }
                }
            }
            Err(e) => log_storage_error(Event::ReadFailed, Medium::Fallback, "*", "*", &e),
        }
        snapshot
    }

    /// Builds a bundle of every store
    pub async fn export_all_data(&self) -> Bundle {
        self.export_bundle(None).await
    }

    /// Builds a bundle of the stores in `filter`, or of every store
    pub async fn export_bundle(&self, filter: Option<&BTreeSet<String>>) -> Bundle {
        let snapshot = self.export_records().await;
        self.metrics.increment_exports();
        Bundle::from_snapshot(&snapshot, &self.application, filter)
    }

    /// Removes every record except internal bookkeeping in the `system`
    /// store. Returns whether the active medium was cleared.
    pub async fn clear_all_data(&self) -> bool {
        let mut media = self.media.lock().await;

        let mut primary_ok = None;
        if let Some(primary) = media.primary.as_mut() {
            match clear_tool_stores(primary) {
                Ok(()) => primary_ok = Some(true),
                Err(e) => {
                    log_storage_error(Event::WriteFailed, Medium::Primary, "*", "*", &e);
                    if e.is_medium_failure() {
                        media.activate_fallback(&e, &self.metrics);
                    } else {
                        primary_ok = Some(false);
                    }
                }
            }
        }

        let fallback_result = if media.primary.is_some() {
            clear_tool_stores(&mut media.fallback)
        } else {
            clear_tool_stores_tracked(&mut media.fallback)
        };
        let fallback_ok = match fallback_result {
            Ok(()) => true,
            Err(e) => {
                log_storage_error(Event::WriteFailed, Medium::Fallback, "*", "*", &e);
                false
            }
        };
        primary_ok.unwrap_or(fallback_ok)
    }

    /// Quota and usage of the active medium
    pub async fn get_storage_info(&self) -> StorageInfo {
        self.media.lock().await.active().storage_info()
    }

    // ---------------------------------------------------------------------
    // Extended operations
    // ---------------------------------------------------------------------

    /// Writes `new` only if the current value equals `expected` (`None`
    /// meaning absent). Atomic with respect to every other facade call.
    pub async fn compare_and_swap(
        &self,
        store: &str,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> CasOutcome {
        let mut media = self.media.lock().await;
        let current = self.read_locked(&mut media, store, key);
        if current.as_ref() != expected {
            return CasOutcome::Conflict;
        }
        match self.put_locked(&mut media, store, key, &new) {
            Ok(_) => {
                self.metrics.increment_saves();
                CasOutcome::Swapped
            }
            Err(_) => {
                self.metrics.increment_save_failures();
                CasOutcome::Failed
            }
        }
    }

    /// Keys whose payload holds `value` under a declared index
    pub async fn find_by_index(&self, store: &str, index: &str, value: &Value) -> Vec<String> {
        let mut media = self.media.lock().await;
        if let Some(primary) = media.primary.as_ref() {
            match primary.find_by_index(store, index, value) {
                Ok(keys) => return keys,
                Err(e) if e.is_medium_failure() => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, store, index, &e);
                    media.activate_fallback(&e, &self.metrics);
                }
                Err(e) => {
                    log_storage_error(Event::ReadFailed, Medium::Primary, store, index, &e);
                    return Vec::new();
                }
            }
        }
        media.fallback.find_by_index(store, index, value).unwrap_or_else(|e| {
            log_storage_error(Event::ReadFailed, Medium::Fallback, store, index, &e);
            Vec::new()
        })
    }

    /// Compacts the primary medium. `None` when running on the fallback or
    /// when compaction failed.
    pub async fn compact(&self) -> Option<u64> {
        let mut media = self.media.lock().await;
        let primary = media.primary.as_mut()?;
        match primary.compact() {
            Ok(reclaimed) => Some(reclaimed),
            Err(e) => {
                log_storage_error(Event::WriteFailed, Medium::Primary, "*", "*", &e);
                None
            }
        }
    }

    /// Every raw `(key, value)` pair of the fallback medium, including keys
    /// outside any store namespace
    pub async fn fallback_raw_entries(&self) -> Vec<(String, String)> {
        let media = self.media.lock().await;
        media
            .fallback
            .raw_keys()
            .into_iter()
            .filter_map(|key| {
                let value = media.fallback.get_raw(&key)?.to_string();
                Some((key, value))
            })
            .collect()
    }

    /// Serializes `value` and saves it
    pub async fn save<T: Serialize>(&self, store: &str, key: &str, value: &T) -> bool {
        match serde_json::to_value(value) {
            Ok(data) => self.save_data(store, key, data).await,
            Err(e) => {
                let reason = e.to_string();
                log_event(Event::WriteFailed, &[("store", store), ("key", key), ("reason", &reason)]);
                self.metrics.increment_save_failures();
                false
            }
        }
    }

    /// Loads and deserializes a value. A payload of the wrong shape is a miss.
    pub async fn load<T: DeserializeOwned>(&self, store: &str, key: &str) -> Option<T> {
        let data = self.load_data(store, key).await?;
        match serde_json::from_value(data) {
            Ok(value) => Some(value),
            Err(e) => {
                let reason = e.to_string();
                log_event(Event::ReadFailed, &[("store", store), ("key", key), ("reason", &reason)]);
                None
            }
        }
    }
}

fn clear_tool_stores(backend: &mut dyn StorageBackend) -> StorageResult<()> {
    for store in backend.store_names() {
        if store != SYSTEM_STORE {
            backend.clear_store(&store)?;
        }
    }
    Ok(())
}

fn clear_tool_stores_tracked(fallback: &mut FallbackStore) -> StorageResult<()> {
    for store in fallback.store_names() {
        if store != SYSTEM_STORE {
            fallback.clear_store_tracked(&store)?;
        }
    }
    Ok(())
}
