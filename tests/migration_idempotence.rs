//! Legacy migration tests
//!
//! Covers:
//! - Legacy fallback keys rewritten into their tool stores
//! - Older database generations read without being modified
//! - A second run performing zero writes
//! - Concurrent runs migrating each record once

use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;
use toolstore::config::StoreConfig;
use toolstore::facade::DataFacade;
use toolstore::migration::{MigrationCoordinator, MigrationOutcome, MigrationPhase};
use toolstore::schema::SchemaRegistry;
use toolstore::storage::{StorageBackend, StorageEngine, FALLBACK_FILE};

// =============================================================================
// Test Utilities
// =============================================================================

fn create_temp_data_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp dir")
}

fn write_legacy_fallback(dir: &TempDir, entries: &[(&str, &str)]) {
    let map: BTreeMap<&str, &str> = entries.iter().copied().collect();
    fs::write(dir.path().join(FALLBACK_FILE), serde_json::to_vec(&map).unwrap()).unwrap();
}

fn open(dir: &TempDir) -> (StoreConfig, Arc<DataFacade>) {
    let config = StoreConfig::new(dir.path());
    let facade = Arc::new(DataFacade::open(&config, config.registry().unwrap()));
    (config, facade)
}

// =============================================================================
// Fallback legacy keys
// =============================================================================

/// A `legacy:qr-generator` key becomes qr-generator/main-data, once
#[tokio::test]
async fn test_legacy_qr_history_migrates_once() {
    let dir = create_temp_data_dir();
    write_legacy_fallback(&dir, &[("legacy:qr-generator", r#"{"history":["a","b","c"]}"#)]);
    let (config, facade) = open(&dir);

    let first = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
    assert_eq!(first.outcome, MigrationOutcome::Completed);
    assert_eq!(first.migrated, 1);
    assert_eq!(
        facade.load_data("qr-generator", "main-data").await,
        Some(json!({"history": ["a", "b", "c"]}))
    );
    let keys_after_first = facade.get_all_keys("qr-generator").await;

    let saves_before = facade.metrics().snapshot().saves;
    let second = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
    assert_eq!(second.outcome, MigrationOutcome::AlreadyComplete);
    assert_eq!(facade.metrics().snapshot().saves, saves_before);
    assert_eq!(facade.get_all_keys("qr-generator").await, keys_after_first);
    assert_eq!(
        facade.load_data("qr-generator", "main-data").await,
        Some(json!({"history": ["a", "b", "c"]}))
    );
}

/// Completion is persisted, so a new session does not migrate again
#[tokio::test]
async fn test_completion_survives_reopen() {
    let dir = create_temp_data_dir();
    write_legacy_fallback(&dir, &[("toolbox-v1:todo-lists:weekend", r#"{"items":["hike"]}"#)]);
    {
        let (config, facade) = open(&dir);
        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.migrated, 1);
    }

    let (config, facade) = open(&dir);
    assert!(facade.delete_data("todo-lists", "weekend").await);
    let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
    assert_eq!(report.outcome, MigrationOutcome::AlreadyComplete);
    assert!(facade.load_data("todo-lists", "weekend").await.is_none());
}

// =============================================================================
// Older database generations
// =============================================================================

#[tokio::test]
async fn test_older_database_generation_is_migrated_and_left_intact() {
    let dir = create_temp_data_dir();
    {
        let registry = SchemaRegistry::with_stores(1, ["calculator-history"]).unwrap();
        let mut legacy = StorageEngine::open(dir.path(), "tools-db-v1", &registry).unwrap();
        legacy
            .put(
                "calculator-history",
                "main",
                &json!({"data": {"expr": "1+1", "result": 2}, "timestamp": 1_600_000_000_000i64}),
            )
            .unwrap();
        legacy.put("calculator-history", "raw", &json!({"expr": "3*3"})).unwrap();
    }

    let (config, facade) = open(&dir);
    let handle = MigrationCoordinator::new(Arc::clone(&facade), &config).spawn();
    let phases = handle.subscribe();
    let report = handle.wait().await.unwrap();
    assert_eq!(report.discovered, 2);
    assert_eq!(report.migrated, 2);
    assert_eq!(*phases.borrow(), MigrationPhase::Completed);

    assert_eq!(
        facade.load_data("calculator-history", "main").await,
        Some(json!({"expr": "1+1", "result": 2}))
    );
    assert_eq!(
        facade.load_data("calculator-history", "raw").await,
        Some(json!({"expr": "3*3"}))
    );

    let legacy = StorageEngine::open_existing(dir.path(), "tools-db-v1").unwrap().unwrap();
    assert_eq!(legacy.list_keys("calculator-history").unwrap().len(), 2);
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test]
async fn test_concurrent_coordinators_migrate_each_record_once() {
    let dir = create_temp_data_dir();
    write_legacy_fallback(
        &dir,
        &[
            ("legacy:qr-generator", r#"{"history":[]}"#),
            ("legacy:unit-converter", r#"{"last":"km"}"#),
        ],
    );
    let (config, facade) = open(&dir);

    let first = MigrationCoordinator::new(Arc::clone(&facade), &config);
    let second = MigrationCoordinator::new(Arc::clone(&facade), &config);
    let (a, b) = tokio::join!(first.spawn().wait(), second.spawn().wait());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.migrated + b.migrated, 2);
    let winners = [a.outcome, b.outcome]
        .iter()
        .filter(|o| **o == MigrationOutcome::Completed)
        .count();
    assert_eq!(winners, 1);
}
