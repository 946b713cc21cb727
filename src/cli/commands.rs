//! CLI command implementations
//!
//! Each command loads the configuration, opens a session and performs one
//! facade operation. Opening a session runs legacy migration to completion
//! before the command touches any data.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::StoreConfig;
use crate::facade::DataFacade;
use crate::migration::{MigrationCoordinator, MigrationReport};
use crate::observability::{log_event, Event, Logger};
use crate::transfer::{ExportImportService, ImportMode};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_payload, write_response};

/// An open persistence layer plus the migration run of its startup
pub struct Session {
    pub config: StoreConfig,
    pub facade: Arc<DataFacade>,
    pub migration: Option<MigrationReport>,
}

impl Session {
    /// Loads the configuration, opens the facade and runs migration
    pub async fn open(config_path: &Path) -> CliResult<Self> {
        let config = StoreConfig::load(config_path)?;
        Logger::set_min_severity(config.log_severity());
        let data_dir = config.data_dir.display().to_string();
        log_event(Event::ConfigLoaded, &[("data_dir", &data_dir)]);

        let facade = Arc::new(DataFacade::open(&config, config.registry()?));

        // A failed migration is retried by the next session
        let migration = match MigrationCoordinator::new(Arc::clone(&facade), &config)
            .spawn()
            .wait()
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                Logger::error("MIGRATION_ABORTED", &[("reason", &e.to_string())]);
                None
            }
        };

        Ok(Self {
            config,
            facade,
            migration,
        })
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub async fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let data = run_command(cli.command).await?;
    write_response(data)
}

/// Run the appropriate command and return its response payload
pub async fn run_command(cmd: Command) -> CliResult<Value> {
    match cmd {
        Command::Init { config, data_dir } => init(&config, &data_dir).await,
        Command::Save {
            config,
            store,
            key,
            data,
        } => {
            let payload = match data {
                Some(inline) => serde_json::from_str(&inline)?,
                None => read_payload()?,
            };
            save(&Session::open(&config).await?, &store, &key, payload).await
        }
        Command::Load { config, store, key } => load(&Session::open(&config).await?, &store, &key).await,
        Command::Delete { config, store, key } => delete(&Session::open(&config).await?, &store, &key).await,
        Command::Keys { config, store } => keys(&Session::open(&config).await?, &store).await,
        Command::Find {
            config,
            store,
            index,
            value,
        } => {
            let value: Value = serde_json::from_str(&value)?;
            find(&Session::open(&config).await?, &store, &index, &value).await
        }
        Command::Export {
            config,
            output,
            stores,
        } => export(&Session::open(&config).await?, output.as_deref(), stores).await,
        Command::Import { config, input, mode } => import(&Session::open(&config).await?, &input, mode).await,
        Command::Migrate { config } => migrate(Session::open(&config).await?),
        Command::Info { config } => info(&Session::open(&config).await?).await,
        Command::Clear { config } => clear(&Session::open(&config).await?).await,
        Command::Compact { config } => compact(&Session::open(&config).await?).await,
    }
}

/// Writes a default configuration for `data_dir` and creates the database
pub async fn init(config_path: &Path, data_dir: &Path) -> CliResult<Value> {
    if config_path.exists() {
        return Err(CliError::already_initialized(config_path));
    }
    let config = StoreConfig::new(data_dir);
    config.validate()?;
    config.save(config_path)?;

    let session = Session::open(config_path).await?;
    let medium = session.facade.active_medium().await;
    Ok(json!({
        "config": config_path.display().to_string(),
        "data_dir": session.config.data_dir.display().to_string(),
        "database": session.config.database_name,
        "medium": medium.as_str(),
    }))
}

pub async fn save(session: &Session, store: &str, key: &str, data: Value) -> CliResult<Value> {
    if !session.facade.save_data(store, key, data).await {
        return Err(CliError::operation_failed(format!("Failed to save {}/{}", store, key)));
    }
    Ok(json!({ "store": store, "key": key, "saved": true }))
}

/// `data` is null when the key is missing or its record failed verification
pub async fn load(session: &Session, store: &str, key: &str) -> CliResult<Value> {
    let data = session.facade.load_data(store, key).await;
    Ok(json!({ "store": store, "key": key, "data": data }))
}

pub async fn delete(session: &Session, store: &str, key: &str) -> CliResult<Value> {
    if !session.facade.delete_data(store, key).await {
        return Err(CliError::operation_failed(format!("Failed to delete {}/{}", store, key)));
    }
    Ok(json!({ "store": store, "key": key, "deleted": true }))
}

pub async fn keys(session: &Session, store: &str) -> CliResult<Value> {
    if !session.facade.registry().contains(store) {
        return Err(CliError::invalid_input(format!("Unknown store '{}'", store)));
    }
    let keys = session.facade.get_all_keys(store).await;
    Ok(json!({ "store": store, "keys": keys }))
}

pub async fn find(session: &Session, store: &str, index: &str, value: &Value) -> CliResult<Value> {
    let declared = session
        .facade
        .registry()
        .store(store)
        .is_some_and(|definition| definition.index(index).is_some());
    if !declared {
        return Err(CliError::invalid_input(format!(
            "Unknown index '{}' on store '{}'",
            index, store
        )));
    }
    let keys = session.facade.find_by_index(store, index, value).await;
    Ok(json!({ "store": store, "index": index, "keys": keys }))
}

pub async fn export(session: &Session, output: Option<&Path>, stores: Vec<String>) -> CliResult<Value> {
    let filter: Option<BTreeSet<String>> = if stores.is_empty() {
        None
    } else {
        Some(stores.into_iter().collect())
    };
    let service = ExportImportService::new(&session.facade);

    match output {
        Some(path) => {
            let bundle = service.export_to_file(path, filter.as_ref()).await?;
            Ok(json!({
                "output": path.display().to_string(),
                "tool_count": bundle.metadata.tool_count,
                "records": bundle.record_count(),
            }))
        }
        None => Ok(service.export_all(filter.as_ref()).await.to_value()?),
    }
}

pub async fn import(session: &Session, input: &Path, mode: ImportMode) -> CliResult<Value> {
    let service = ExportImportService::new(&session.facade);
    let report = service.import_file(input, mode).await?;
    Ok(json!({
        "mode": mode.as_str(),
        "imported": report.imported,
        "failed_records": report.failed_records,
        "failed_stores": report.failed_stores,
    }))
}

/// Reports the migration run of session startup
pub fn migrate(session: Session) -> CliResult<Value> {
    match session.migration {
        Some(report) => Ok(serde_json::to_value(report)?),
        None => Err(CliError::new(
            super::errors::CliErrorCode::MigrationFailed,
            "Migration did not complete; see the log for the cause",
        )),
    }
}

pub async fn info(session: &Session) -> CliResult<Value> {
    let info = session.facade.get_storage_info().await;
    let metrics = session.facade.metrics().snapshot();
    Ok(json!({
        "quota": info.quota,
        "usage": info.usage,
        "available": info.available,
        "medium": info.medium.as_str(),
        "schema_version": session.facade.registry().version(),
        "stores": session.facade.registry().store_names(),
        "corruptions_detected": metrics.corruptions_detected,
    }))
}

pub async fn clear(session: &Session) -> CliResult<Value> {
    if !session.facade.clear_all_data().await {
        return Err(CliError::operation_failed("Failed to clear data"));
    }
    Ok(json!({ "cleared": true }))
}

pub async fn compact(session: &Session) -> CliResult<Value> {
    match session.facade.compact().await {
        Some(reclaimed) => Ok(json!({ "reclaimed_bytes": reclaimed })),
        None => Err(CliError::operation_failed(
            "Compaction unavailable: the primary medium is not active",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_session(dir: &TempDir) -> Session {
        let config_path = dir.path().join("toolstore.json");
        init(&config_path, &dir.path().join("data")).await.unwrap();
        Session::open(&config_path).await.unwrap()
    }

    #[tokio::test]
    async fn test_init_refuses_existing_config() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("toolstore.json");
        let out = init(&config_path, &dir.path().join("data")).await.unwrap();
        assert_eq!(out["medium"], json!("primary"));
        assert_eq!(out["database"], json!("tools-db"));

        let err = init(&config_path, &dir.path().join("data")).await.unwrap_err();
        assert_eq!(err.code_str(), "TOOLSTORE_CLI_ALREADY_INITIALIZED");
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let session = init_session(&dir).await;

        save(&session, "todo-lists", "groceries", json!({"items": ["milk"]})).await.unwrap();
        let out = load(&session, "todo-lists", "groceries").await.unwrap();
        assert_eq!(out["data"], json!({"items": ["milk"]}));

        let out = keys(&session, "todo-lists").await.unwrap();
        assert_eq!(out["keys"], json!(["groceries"]));

        delete(&session, "todo-lists", "groceries").await.unwrap();
        let out = load(&session, "todo-lists", "groceries").await.unwrap();
        assert!(out["data"].is_null());
    }

    #[tokio::test]
    async fn test_unknown_store_is_rejected() {
        let dir = TempDir::new().unwrap();
        let session = init_session(&dir).await;

        let err = save(&session, "no-such-tool", "k", json!(1)).await.unwrap_err();
        assert_eq!(err.code_str(), "TOOLSTORE_CLI_OPERATION_FAILED");
        let err = keys(&session, "no-such-tool").await.unwrap_err();
        assert_eq!(err.code_str(), "TOOLSTORE_CLI_INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_session_runs_migration() {
        let dir = TempDir::new().unwrap();
        let session = init_session(&dir).await;
        let report = migrate(session).unwrap();
        assert_eq!(report["outcome"], json!("already_complete"));
    }

    #[tokio::test]
    async fn test_info_reports_primary() {
        let dir = TempDir::new().unwrap();
        let session = init_session(&dir).await;
        let out = info(&session).await.unwrap();
        assert_eq!(out["medium"], json!("primary"));
        assert_eq!(out["schema_version"], json!(1));
    }
}
