//! Replaying fallback writes onto the primary medium
//!
//! A session that ran without the primary medium leaves its records and
//! tombstones in the fallback file. When a later session opens the primary
//! medium again they are applied to it, the newer timestamp winning, and
//! then dropped from the fallback file.
//!
//! Replay is idempotent: a replay cut short by a failure leaves the fallback
//! file untouched and is repeated on the next open.

use std::collections::BTreeMap;

use super::backend::StorageBackend;
use super::engine::StorageEngine;
use super::errors::StorageResult;
use super::fallback::FallbackStore;

/// Statistics from one replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Fallback records written to the primary medium
    pub records_applied: u64,
    /// Fallback records older than the primary copy
    pub records_superseded: u64,
    /// Primary records removed by tombstones
    pub deletes_applied: u64,
}

impl ReconcileStats {
    pub fn is_empty(&self) -> bool {
        self.records_applied == 0 && self.records_superseded == 0 && self.deletes_applied == 0
    }
}

/// Applies every fallback record and tombstone to `primary`.
///
/// Tombstones go first so that a record saved after a delete survives.
pub fn reconcile(primary: &mut StorageEngine, fallback: &mut FallbackStore) -> StorageResult<ReconcileStats> {
    let tombstones = fallback.tombstones();
    let snapshot = fallback.export_all()?;
    let mut stats = ReconcileStats::default();
    if tombstones.is_empty() && snapshot.values().all(BTreeMap::is_empty) {
        return Ok(stats);
    }

    for tombstone in &tombstones {
        let keys = match &tombstone.key {
            Some(key) => vec![key.clone()],
            None => primary.list_keys(&tombstone.store)?,
        };
        for key in keys {
            if newer_on_primary(primary, &tombstone.store, &key, tombstone.timestamp)? {
                continue;
            }
            if primary.delete(&tombstone.store, &key)? {
                stats.deletes_applied += 1;
            }
        }
    }

    for (store, records) in &snapshot {
        for (key, record) in records {
            if newer_on_primary(primary, store, key, record.timestamp)? {
                stats.records_superseded += 1;
                continue;
            }
            primary.put(store, key, &record.payload)?;
            stats.records_applied += 1;
        }
    }

    fallback.discard_tracked()?;
    Ok(stats)
}

/// Whether the primary copy of `key` was written after `timestamp`. A
/// damaged primary copy never wins.
fn newer_on_primary(primary: &StorageEngine, store: &str, key: &str, timestamp: i64) -> StorageResult<bool> {
    match primary.get(store, key) {
        Ok(Some(record)) => Ok(record.timestamp > timestamp),
        Ok(None) => Ok(false),
        Err(e) if e.is_corruption() => Ok(false),
        Err(e) => Err(e),
    }
}
