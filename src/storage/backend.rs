//! # Storage Backend Trait
//!
//! Capability interface shared by the primary and fallback media. The facade
//! picks one implementation at startup and only ever talks to this trait.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::errors::StorageResult;
use super::record::Record;

/// store -> key -> record
pub type StoreSnapshot = BTreeMap<String, BTreeMap<String, Record>>;

/// Which medium served an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Primary,
    Fallback,
}

impl Medium {
    pub fn as_str(&self) -> &'static str {
        match self {
            Medium::Primary => "primary",
            Medium::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Medium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space accounting for the active medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageInfo {
    pub quota: u64,
    pub usage: u64,
    pub available: u64,
    pub medium: Medium,
}

impl StorageInfo {
    pub fn new(quota: u64, usage: u64, medium: Medium) -> Self {
        Self {
            quota,
            usage,
            available: quota.saturating_sub(usage),
            medium,
        }
    }
}

/// Backend trait for record storage
pub trait StorageBackend: Send + fmt::Debug {
    /// Medium this backend represents
    fn medium(&self) -> Medium;

    /// Stores known to the backend, ordered
    fn store_names(&self) -> Vec<String>;

    /// Write `payload` under `key`, returning the stored record
    fn put(&mut self, store: &str, key: &str, payload: &Value) -> StorageResult<Record>;

    /// Read and verify a record. A checksum mismatch is a
    /// `DataCorruption` error; the payload is never returned.
    fn get(&self, store: &str, key: &str) -> StorageResult<Option<Record>>;

    /// Remove a key. Returns `false` if it was absent.
    fn delete(&mut self, store: &str, key: &str) -> StorageResult<bool>;

    /// Keys of a store, sorted
    fn list_keys(&self, store: &str) -> StorageResult<Vec<String>>;

    /// Every verified record of every store. Corrupted records are skipped.
    fn export_all(&self) -> StorageResult<StoreSnapshot>;

    /// Remove every record of one store
    fn clear_store(&mut self, store: &str) -> StorageResult<()>;

    /// Remove every record of every store
    fn clear_all(&mut self) -> StorageResult<()> {
        for store in self.store_names() {
            self.clear_store(&store)?;
        }
        Ok(())
    }

    /// Keys whose payload holds `value` under the named index
    fn find_by_index(&self, store: &str, index: &str, value: &Value) -> StorageResult<Vec<String>>;

    /// Bytes currently used
    fn usage_bytes(&self) -> u64;

    /// Bytes the medium may hold
    fn quota_bytes(&self) -> u64;

    fn storage_info(&self) -> StorageInfo {
        StorageInfo::new(self.quota_bytes(), self.usage_bytes(), self.medium())
    }
}
