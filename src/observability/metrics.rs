//! Operational counters
//!
//! Counters only, monotonic, reset on process start.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters kept by the facade and the services above it
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    saves: AtomicU64,
    save_failures: AtomicU64,
    loads: AtomicU64,
    load_misses: AtomicU64,
    deletes: AtomicU64,
    fallback_activations: AtomicU64,
    fallback_operations: AtomicU64,
    corruptions_detected: AtomicU64,
    migrated_records: AtomicU64,
    migration_failures: AtomicU64,
    exports: AtomicU64,
    imports: AtomicU64,
    imports_rejected: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_saves(&self) {
        self.saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_save_failures(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_loads(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_load_misses(&self) {
        self.load_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_fallback_activations(&self) {
        self.fallback_activations.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts operations served by the fallback medium
    pub fn increment_fallback_operations(&self) {
        self.fallback_operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_corruptions(&self) {
        self.corruptions_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_migrated_records(&self, count: u64) {
        self.migrated_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_migration_failures(&self, count: u64) {
        self.migration_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_exports(&self) {
        self.exports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_imports(&self) {
        self.imports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_imports_rejected(&self) {
        self.imports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_misses: self.load_misses.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            fallback_activations: self.fallback_activations.load(Ordering::Relaxed),
            fallback_operations: self.fallback_operations.load(Ordering::Relaxed),
            corruptions_detected: self.corruptions_detected.load(Ordering::Relaxed),
            migrated_records: self.migrated_records.load(Ordering::Relaxed),
            migration_failures: self.migration_failures.load(Ordering::Relaxed),
            exports: self.exports.load(Ordering::Relaxed),
            imports: self.imports.load(Ordering::Relaxed),
            imports_rejected: self.imports_rejected.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub saves: u64,
    pub save_failures: u64,
    pub loads: u64,
    pub load_misses: u64,
    pub deletes: u64,
    pub fallback_activations: u64,
    pub fallback_operations: u64,
    pub corruptions_detected: u64,
    pub migrated_records: u64,
    pub migration_failures: u64,
    pub exports: u64,
    pub imports: u64,
    pub imports_rejected: u64,
}
