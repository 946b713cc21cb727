//! Export and import through the facade
//!
//! Import validates the whole bundle before the first write. Once writing
//! starts, a store that cannot be imported is counted and skipped; the
//! remaining stores are still imported.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;

use super::bundle::{read_bundle_file, validate, Bundle};
use super::errors::{TransferError, TransferResult};
use crate::facade::{DataFacade, Notification, NotificationSeverity};
use crate::observability::{log_event, Event, ObservationScope};
use crate::schema::{PREFERENCES_STORE, SYSTEM_STORE};

/// How an import treats existing records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Delete every existing key of each target store first
    Replace,
    /// Upsert bundle records, keep everything else
    Merge,
}

impl ImportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportMode::Replace => "replace",
            ImportMode::Merge => "merge",
        }
    }
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(ImportMode::Replace),
            "merge" => Ok(ImportMode::Merge),
            other => Err(format!("Invalid import mode '{}'. Must be 'replace' or 'merge'.", other)),
        }
    }
}

/// Outcome of an import that passed validation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    /// Records written
    pub imported: usize,
    /// Records not written
    pub failed_records: usize,
    /// Stores with at least one failure, ordered
    pub failed_stores: Vec<String>,
}

/// Builds and restores bundles
#[derive(Debug, Clone, Copy)]
pub struct ExportImportService<'a> {
    facade: &'a DataFacade,
}

impl<'a> ExportImportService<'a> {
    pub fn new(facade: &'a DataFacade) -> Self {
        Self { facade }
    }

    /// Bundle of every store, or of the stores named in `filter`
    pub async fn export_all(&self, filter: Option<&BTreeSet<String>>) -> Bundle {
        let bundle = self.facade.export_bundle(filter).await;
        self.facade.notifier().notify(Notification::success(
            "Export complete",
            format!(
                "{} records from {} tools",
                bundle.record_count(),
                bundle.metadata.tool_count
            ),
        ));
        bundle
    }

    /// Exports to a pretty-printed JSON file
    pub async fn export_to_file(&self, path: &Path, filter: Option<&BTreeSet<String>>) -> TransferResult<Bundle> {
        let bundle = self.export_all(filter).await;
        if let Err(e) = bundle.write_to_file(path) {
            self.facade
                .notifier()
                .notify(Notification::error("Export failed", e.to_string()));
            return Err(e);
        }
        Ok(bundle)
    }

    /// Imports a bundle file
    pub async fn import_file(&self, path: &Path, mode: ImportMode) -> TransferResult<ImportReport> {
        let value = match read_bundle_file(path) {
            Ok(value) => value,
            Err(e) => return Err(self.reject(e)),
        };
        self.import_bundle(&value, mode).await
    }

    fn reject(&self, error: TransferError) -> TransferError {
        let reason = error.to_string();
        log_event(Event::ImportRejected, &[("reason", &reason)]);
        self.facade.metrics().increment_imports_rejected();
        self.facade
            .notifier()
            .notify(Notification::error("Import rejected", reason));
        error
    }

    /// Restores a bundle.
    ///
    /// Returns `ImportValidation` without touching storage when the bundle
    /// is malformed.
    pub async fn import_bundle(&self, value: &Value, mode: ImportMode) -> TransferResult<ImportReport> {
        let validated = validate(value).map_err(|e| self.reject(e))?;

        let scope = ObservationScope::with_fields("IMPORT", &[("mode", mode.as_str())]);
        let mut report = ImportReport::default();

        let mut targets: Vec<(String, Vec<(String, Value)>)> = validated
            .tools
            .into_iter()
            .map(|(store, records)| (store, records.into_iter().collect()))
            .collect();
        if let Some(preferences) = validated.preferences {
            targets.push((PREFERENCES_STORE.to_string(), preferences.into_iter().collect()));
        }

        for (store, records) in targets {
            let (written, failed) = self.import_store(&store, records, mode).await;
            report.imported += written;
            report.failed_records += failed;
            if failed > 0 {
                report.failed_stores.push(store);
            }
        }
        report.failed_stores.sort();

        self.facade.metrics().increment_imports();
        let imported = report.imported.to_string();
        let failed = report.failed_records.to_string();
        scope.complete_with_fields(&[("imported", &imported), ("failed_records", &failed)]);

        let severity = if report.failed_records == 0 {
            NotificationSeverity::Success
        } else {
            NotificationSeverity::Warning
        };
        self.facade.notifier().notify(Notification::new(
            "Import complete",
            format!("{} records imported, {} failed", report.imported, report.failed_records),
            severity,
        ));
        Ok(report)
    }

    /// Imports one store. Returns (written, failed).
    async fn import_store(&self, store: &str, records: Vec<(String, Value)>, mode: ImportMode) -> (usize, usize) {
        let total = records.len();
        if store == SYSTEM_STORE || !self.facade.registry().contains(store) {
            log_event(
                Event::ImportStoreFailed,
                &[("store", store), ("reason", "store is not importable")],
            );
            return (0, total);
        }

        if mode == ImportMode::Replace {
            for key in self.facade.get_all_keys(store).await {
                if !self.facade.delete_data(store, &key).await {
                    log_event(
                        Event::ImportStoreFailed,
                        &[("store", store), ("key", &key), ("reason", "failed to clear existing key")],
                    );
                    return (0, total);
                }
            }
        }

        let mut written = 0;
        for (key, data) in records {
            if self.facade.save_data(store, &key, data).await {
                written += 1;
            } else {
                log_event(
                    Event::ImportStoreFailed,
                    &[("store", store), ("key", &key), ("reason", "write failed")],
                );
            }
        }
        (written, total - written)
    }
}
