//! Migration coordinator
//!
//! Runs at most once to completion per data directory. The claim on the run
//! and every phase change are compare-and-swap writes of the state record
//! through the facade, so two concurrent invocations cannot both migrate.
//! Rewriting a record that already exists is skipped, which keeps a re-run
//! after a crash harmless.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::errors::{MigrationError, MigrationItemError, MigrationResult};
use super::legacy::{transform_value, LegacyItem, LegacyKeyPattern};
use super::state::{MigrationPhase, MigrationState, MIGRATION_STATE_KEY};
use crate::config::StoreConfig;
use crate::facade::{CasOutcome, DataFacade, Notification, NotificationSeverity};
use crate::observability::{log_event, Event, ObservationScope};
use crate::schema::SYSTEM_STORE;
use crate::storage::{StorageBackend, StorageEngine};

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// This run migrated and marked the state completed
    Completed,
    /// A previous run already completed; nothing was written
    AlreadyComplete,
    /// Another invocation holds a live claim; nothing was written
    InProgressElsewhere,
}

/// Counts for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub outcome: MigrationOutcome,
    pub discovered: u64,
    pub migrated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<MigrationItemError>,
}

impl MigrationReport {
    fn noop(outcome: MigrationOutcome) -> Self {
        Self {
            outcome,
            discovered: 0,
            migrated: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct MigrationCoordinator {
    facade: Arc<DataFacade>,
    data_dir: PathBuf,
    pattern: LegacyKeyPattern,
    legacy_databases: Vec<String>,
    lease_ms: i64,
    owner: String,
    phase_tx: watch::Sender<MigrationPhase>,
}

impl MigrationCoordinator {
    pub fn new(facade: Arc<DataFacade>, config: &StoreConfig) -> Self {
        let (phase_tx, _) = watch::channel(MigrationPhase::NotStarted);
        Self {
            facade,
            data_dir: config.data_dir.clone(),
            pattern: LegacyKeyPattern::new(&config.legacy_tool_prefix, &config.legacy_keyed_prefix),
            legacy_databases: config.legacy_databases.clone(),
            lease_ms: i64::try_from(config.migration_lease_secs.saturating_mul(1000)).unwrap_or(i64::MAX),
            owner: Uuid::new_v4().to_string(),
            phase_tx,
        }
    }

    /// Claim id of this coordinator
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Phase updates of this coordinator's run
    pub fn subscribe(&self) -> watch::Receiver<MigrationPhase> {
        self.phase_tx.subscribe()
    }

    /// Runs the migration on a tokio task
    pub fn spawn(self) -> MigrationHandle {
        let phase_rx = self.subscribe();
        let task = tokio::spawn(async move { self.run().await });
        MigrationHandle { task, phase_rx }
    }

    /// Runs the migration to completion
    pub async fn run(&self) -> MigrationResult<MigrationReport> {
        let stored = self.facade.load_data(SYSTEM_STORE, MIGRATION_STATE_KEY).await;
        let state = MigrationState::from_stored(stored.clone())?;

        if state.phase.is_terminal() {
            log_event(Event::MigrationAlreadyComplete, &[("owner", &self.owner)]);
            self.phase_tx.send_replace(MigrationPhase::Completed);
            return Ok(MigrationReport::noop(MigrationOutcome::AlreadyComplete));
        }

        let now = Utc::now().timestamp_millis();
        if state.held_by_other(&self.owner, now, self.lease_ms) {
            self.log_claim_lost(&state);
            return Ok(MigrationReport::noop(MigrationOutcome::InProgressElsewhere));
        }

        let claimed = MigrationState::claim(&self.owner, now);
        match self
            .facade
            .compare_and_swap(SYSTEM_STORE, MIGRATION_STATE_KEY, stored.as_ref(), claimed.to_value())
            .await
        {
            CasOutcome::Swapped => {}
            CasOutcome::Conflict => {
                self.log_claim_lost(&state);
                return Ok(MigrationReport::noop(MigrationOutcome::InProgressElsewhere));
            }
            CasOutcome::Failed => return Err(MigrationError::StatePersistFailed(claimed.phase.name())),
        }
        self.announce(MigrationPhase::Scanning);

        let scope = ObservationScope::with_fields("MIGRATION", &[("owner", &self.owner)]);
        match self.migrate(claimed).await {
            Ok(report) => {
                let migrated = report.migrated.to_string();
                let failed = report.failed.to_string();
                scope.complete_with_fields(&[("migrated", &migrated), ("failed", &failed)]);
                self.notify(&report);
                Ok(report)
            }
            Err(e) => {
                scope.fail(&e.to_string());
                self.facade
                    .notifier()
                    .notify(Notification::error("Migration failed", e.to_string()));
                Err(e)
            }
        }
    }

    async fn migrate(&self, claimed: MigrationState) -> MigrationResult<MigrationReport> {
        let items = self.scan().await;

        let mut migrating = claimed.transition(MigrationPhase::Migrating)?;
        migrating.discovered = items.len() as u64;
        let mut last = self.persist(&claimed, migrating).await?;

        let mut tally = last.clone();
        let mut errors = Vec::new();
        for item in items {
            if self.facade.load_data(&item.store, &item.key).await.is_some() {
                tally.skipped += 1;
                continue;
            }
            if self.facade.save_data(&item.store, &item.key, item.value).await {
                tally.migrated += 1;
            } else {
                let error = MigrationItemError::new(item.source, item.store, item.key, "write failed");
                let reason = error.to_string();
                log_event(Event::MigrationItemFailed, &[("reason", &reason)]);
                errors.push(error);
                tally.failed += 1;
            }
        }

        let metrics = self.facade.metrics();
        metrics.add_migrated_records(tally.migrated);
        metrics.add_migration_failures(tally.failed);

        if tally.failed > 0 {
            let partial = last.transition(MigrationPhase::FailedPartial)?.with_counts(&tally);
            last = self.persist(&last, partial).await?;
        }
        let mut completed = last.transition(MigrationPhase::Completed)?.with_counts(&tally);
        completed.completed_at = Some(Utc::now().timestamp_millis());
        let completed = self.persist(&last, completed).await?;

        Ok(MigrationReport {
            outcome: MigrationOutcome::Completed,
            discovered: completed.discovered,
            migrated: completed.migrated,
            skipped: completed.skipped,
            failed: completed.failed,
            errors,
        })
    }

    /// Collects legacy records from every known source
    async fn scan(&self) -> Vec<LegacyItem> {
        let entries = self.facade.fallback_raw_entries().await;
        let mut items = self.pattern.scan(&entries);

        for name in &self.legacy_databases {
            if !StorageEngine::exists(&self.data_dir, name) {
                continue;
            }
            let engine = match StorageEngine::open_existing(&self.data_dir, name) {
                Ok(Some(engine)) => engine,
                Ok(None) => continue,
                Err(e) => {
                    let reason = e.to_string();
                    log_event(Event::MigrationSourceFailed, &[("source", name), ("reason", &reason)]);
                    continue;
                }
            };
            let snapshot = match engine.export_all() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    let reason = e.to_string();
                    log_event(Event::MigrationSourceFailed, &[("source", name), ("reason", &reason)]);
                    continue;
                }
            };
            for (store, records) in snapshot {
                if store == SYSTEM_STORE {
                    continue;
                }
                for (key, record) in records {
                    items.push(LegacyItem {
                        source: name.clone(),
                        store: store.clone(),
                        key,
                        value: transform_value(record.payload),
                    });
                }
            }
        }
        items
    }

    /// Writes `next` if the stored state still equals `current`
    async fn persist(&self, current: &MigrationState, next: MigrationState) -> MigrationResult<MigrationState> {
        let expected: Value = current.to_value();
        match self
            .facade
            .compare_and_swap(SYSTEM_STORE, MIGRATION_STATE_KEY, Some(&expected), next.to_value())
            .await
        {
            CasOutcome::Swapped => {
                self.announce(next.phase);
                Ok(next)
            }
            CasOutcome::Conflict => {
                log_event(
                    Event::MigrationClaimLost,
                    &[("owner", &self.owner), ("phase", current.phase.name())],
                );
                Err(MigrationError::ClaimLost(current.phase.name()))
            }
            CasOutcome::Failed => Err(MigrationError::StatePersistFailed(next.phase.name())),
        }
    }

    fn announce(&self, phase: MigrationPhase) {
        log_event(
            Event::MigrationPhaseChanged,
            &[("owner", &self.owner), ("phase", phase.name())],
        );
        self.phase_tx.send_replace(phase);
    }

    fn log_claim_lost(&self, state: &MigrationState) {
        log_event(
            Event::MigrationClaimLost,
            &[
                ("owner", &self.owner),
                ("holder", state.owner.as_deref().unwrap_or("unknown")),
                ("phase", state.phase.name()),
            ],
        );
    }

    fn notify(&self, report: &MigrationReport) {
        if report.discovered == 0 {
            return;
        }
        let severity = if report.failed == 0 {
            NotificationSeverity::Success
        } else {
            NotificationSeverity::Warning
        };
        self.facade.notifier().notify(Notification::new(
            "Data migrated",
            format!(
                "{} records migrated, {} already present, {} failed",
                report.migrated, report.skipped, report.failed
            ),
            severity,
        ));
    }
}

/// A migration running on a tokio task
#[derive(Debug)]
pub struct MigrationHandle {
    task: JoinHandle<MigrationResult<MigrationReport>>,
    phase_rx: watch::Receiver<MigrationPhase>,
}

impl MigrationHandle {
    /// Phase updates, starting from the latest phase
    pub fn subscribe(&self) -> watch::Receiver<MigrationPhase> {
        self.phase_rx.clone()
    }

    /// Waits for the run to finish
    pub async fn wait(self) -> MigrationResult<MigrationReport> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(MigrationError::TaskAborted(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::MemoryNotifier;
    use crate::storage::FALLBACK_FILE;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup(dir: &TempDir) -> (StoreConfig, Arc<DataFacade>) {
        setup_with_legacy(dir, &[])
    }

    /// Legacy keys live outside every store namespace of the fallback file
    fn setup_with_legacy(dir: &TempDir, legacy: &[(&str, &str)]) -> (StoreConfig, Arc<DataFacade>) {
        if !legacy.is_empty() {
            let entries: BTreeMap<&str, &str> = legacy.iter().copied().collect();
            std::fs::write(dir.path().join(FALLBACK_FILE), serde_json::to_vec(&entries).unwrap()).unwrap();
        }
        let config = StoreConfig::new(dir.path()).with_store_names(["qr-generator", "todo-lists"]);
        let facade = Arc::new(
            DataFacade::open(&config, config.registry().unwrap()).with_notifier(Arc::new(MemoryNotifier::new())),
        );
        (config, facade)
    }

    #[tokio::test]
    async fn test_fresh_run_without_sources() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup(&dir);

        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.outcome, MigrationOutcome::Completed);
        assert_eq!(report.discovered, 0);

        let stored = facade.load_data(SYSTEM_STORE, MIGRATION_STATE_KEY).await;
        let state = MigrationState::from_stored(stored).unwrap();
        assert_eq!(state.phase, MigrationPhase::Completed);
        assert!(state.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_migrates_fallback_legacy_keys_once() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(
            &dir,
            &[
                ("legacy:qr-generator", r#"{"history":["a","b"]}"#),
                ("toolbox-v1:todo-lists:list-1", r#"{"data":{"items":[]},"timestamp":3}"#),
            ],
        );

        let first = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(first.outcome, MigrationOutcome::Completed);
        assert_eq!(first.migrated, 2);
        assert_eq!(
            facade.load_data("qr-generator", "main-data").await,
            Some(json!({"history": ["a", "b"]}))
        );
        assert_eq!(facade.load_data("todo-lists", "list-1").await, Some(json!({"items": []})));

        let saves_before = facade.metrics().snapshot().saves;
        let second = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(second.outcome, MigrationOutcome::AlreadyComplete);
        assert_eq!(second.migrated, 0);
        assert_eq!(facade.metrics().snapshot().saves, saves_before);
    }

    #[tokio::test]
    async fn test_existing_records_win() {
        let dir = TempDir::new().unwrap();
        let (config, facade) =
            setup_with_legacy(&dir, &[("legacy:qr-generator", r#"{"history":["old"]}"#)]);
        assert!(facade.save_data("qr-generator", "main-data", json!({"history": ["new"]})).await);

        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.migrated, 0);
        assert_eq!(
            facade.load_data("qr-generator", "main-data").await,
            Some(json!({"history": ["new"]}))
        );
    }

    #[tokio::test]
    async fn test_unknown_store_counts_as_item_failure() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(
            &dir,
            &[("legacy:retired-tool", "[1,2,3]"), ("legacy:qr-generator", "{}")],
        );

        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.outcome, MigrationOutcome::Completed);
        assert_eq!(report.migrated, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].store, "retired-tool");

        let stored = facade.load_data(SYSTEM_STORE, MIGRATION_STATE_KEY).await;
        let state = MigrationState::from_stored(stored).unwrap();
        assert_eq!(state.phase, MigrationPhase::Completed);
        assert_eq!(state.failed, 1);
        assert_eq!(facade.metrics().snapshot().migration_failures, 1);
    }

    #[tokio::test]
    async fn test_live_foreign_claim_is_respected() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(&dir, &[("legacy:qr-generator", "{}")]);
        let foreign = MigrationState::claim("someone-else", Utc::now().timestamp_millis());
        assert!(facade.save_data(SYSTEM_STORE, MIGRATION_STATE_KEY, foreign.to_value()).await);

        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.outcome, MigrationOutcome::InProgressElsewhere);
        assert!(facade.load_data("qr-generator", "main-data").await.is_none());
    }

    #[tokio::test]
    async fn test_stale_claim_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(&dir, &[("legacy:qr-generator", "{}")]);
        let stale = MigrationState::claim("crashed-run", 0);
        assert!(facade.save_data(SYSTEM_STORE, MIGRATION_STATE_KEY, stale.to_value()).await);

        let report = MigrationCoordinator::new(Arc::clone(&facade), &config).run().await.unwrap();
        assert_eq!(report.outcome, MigrationOutcome::Completed);
        assert_eq!(report.migrated, 1);
    }

    #[tokio::test]
    async fn test_concurrent_runs_migrate_once() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(&dir, &[("legacy:qr-generator", "{}")]);
        let a = MigrationCoordinator::new(Arc::clone(&facade), &config);
        let b = MigrationCoordinator::new(Arc::clone(&facade), &config);

        let (ra, rb) = tokio::join!(a.run(), b.run());
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        let completed = [&ra, &rb]
            .iter()
            .filter(|r| r.outcome == MigrationOutcome::Completed)
            .count();
        assert_eq!(completed, 1);
        assert_eq!(ra.migrated + rb.migrated, 1);
    }

    #[tokio::test]
    async fn test_spawned_run_reports_phases() {
        let dir = TempDir::new().unwrap();
        let (config, facade) = setup_with_legacy(&dir, &[("legacy:qr-generator", "{}")]);

        let handle = MigrationCoordinator::new(Arc::clone(&facade), &config).spawn();
        let phases = handle.subscribe();
        let report = handle.wait().await.unwrap();
        assert_eq!(report.migrated, 1);
        assert_eq!(*phases.borrow(), MigrationPhase::Completed);
    }
}
