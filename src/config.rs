//! Store configuration
//!
//! Loaded from a JSON file. Every field except `data_dir` has a default:
//!
//! ```json
//! {
//!   "data_dir": "./toolstore-data",
//!   "stores": [{"name": "notes", "indexes": [{"name": "by_tag", "keyPath": "tag"}]}]
//! }
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Severity;
use crate::schema::{is_reserved_store, validate_store_name, SchemaError, SchemaRegistry, StoreDefinition};
use crate::storage::{DEFAULT_FALLBACK_QUOTA, DEFAULT_PRIMARY_QUOTA};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid store declaration: {0}")]
    Schema(#[from] SchemaError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration for one persistence layer instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the databases and the fallback file
    pub data_dir: PathBuf,

    /// Name of the current primary database
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Schema version of the declared stores
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Tool stores, in addition to the built-in `preferences` and `system`
    #[serde(default = "default_stores")]
    pub stores: Vec<StoreDefinition>,

    /// Primary medium quota in bytes
    #[serde(default = "default_quota")]
    pub quota_bytes: u64,

    /// Fallback medium quota in bytes
    #[serde(default = "default_fallback_quota")]
    pub fallback_quota_bytes: u64,

    /// Recorded in exported bundles
    #[serde(default = "default_application")]
    pub application: String,

    /// Older primary databases scanned by migration, opened read-only
    #[serde(default = "default_legacy_databases")]
    pub legacy_databases: Vec<String>,

    /// Fallback keys `<prefix><tool>` hold one whole-tool record
    #[serde(default = "default_legacy_tool_prefix")]
    pub legacy_tool_prefix: String,

    /// Fallback keys `<prefix><tool>:<key>` hold one keyed record
    #[serde(default = "default_legacy_keyed_prefix")]
    pub legacy_keyed_prefix: String,

    /// How long a migration claim stays valid
    #[serde(default = "default_migration_lease_secs")]
    pub migration_lease_secs: u64,

    /// Minimum log severity (`trace`, `info`, `warn`, `error`)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_name() -> String {
    "tools-db".to_string()
}
fn default_schema_version() -> u32 {
    1
}
fn default_stores() -> Vec<StoreDefinition> {
    ["calculator-history", "qr-generator", "todo-lists", "unit-converter"]
        .into_iter()
        .map(StoreDefinition::new)
        .collect()
}
fn default_quota() -> u64 {
    DEFAULT_PRIMARY_QUOTA
}
fn default_fallback_quota() -> u64 {
    DEFAULT_FALLBACK_QUOTA
}
fn default_application() -> String {
    "toolbox".to_string()
}
fn default_legacy_databases() -> Vec<String> {
    vec!["tools-db-v1".to_string(), "tools-db-v2".to_string()]
}
fn default_legacy_tool_prefix() -> String {
    "legacy:".to_string()
}
fn default_legacy_keyed_prefix() -> String {
    "toolbox-v1:".to_string()
}
fn default_migration_lease_secs() -> u64 {
    300
}
// stdout carries command responses, so only errors are logged by default
fn default_log_level() -> String {
    "error".to_string()
}

impl StoreConfig {
    /// Default configuration rooted at `data_dir`
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_name: default_database_name(),
            schema_version: default_schema_version(),
            stores: default_stores(),
            quota_bytes: default_quota(),
            fallback_quota_bytes: default_fallback_quota(),
            application: default_application(),
            legacy_databases: default_legacy_databases(),
            legacy_tool_prefix: default_legacy_tool_prefix(),
            legacy_keyed_prefix: default_legacy_keyed_prefix(),
            migration_lease_secs: default_migration_lease_secs(),
            log_level: default_log_level(),
        }
    }

    /// Builder: replace the tool stores with plain stores of these names
    pub fn with_store_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stores = names.into_iter().map(StoreDefinition::new).collect();
        self
    }

    /// Load and validate configuration from file
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration as pretty JSON
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }

        validate_store_name(&self.database_name)
            .map_err(|_| ConfigError::Invalid(format!("Invalid database_name: '{}'", self.database_name)))?;
        for legacy in &self.legacy_databases {
            validate_store_name(legacy)
                .map_err(|_| ConfigError::Invalid(format!("Invalid legacy database name: '{}'", legacy)))?;
            if *legacy == self.database_name {
                return Err(ConfigError::Invalid(format!(
                    "Legacy database '{}' is the current database",
                    legacy
                )));
            }
        }

        if self.schema_version == 0 {
            return Err(ConfigError::Invalid("schema_version must be >= 1".into()));
        }
        if self.quota_bytes == 0 || self.fallback_quota_bytes == 0 {
            return Err(ConfigError::Invalid("quotas must be > 0".into()));
        }
        if self.migration_lease_secs == 0 {
            return Err(ConfigError::Invalid("migration_lease_secs must be > 0".into()));
        }
        if Severity::parse(&self.log_level).is_none() {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level: '{}'. Must be trace, info, warn or error.",
                self.log_level
            )));
        }

        for prefix in [&self.legacy_tool_prefix, &self.legacy_keyed_prefix] {
            if prefix.len() < 2 || !prefix.ends_with(':') {
                return Err(ConfigError::Invalid(format!(
                    "Legacy prefix '{}' must be non-empty and end with ':'",
                    prefix
                )));
            }
        }

        let mut seen = BTreeSet::new();
        for store in &self.stores {
            if is_reserved_store(&store.name) {
                return Err(ConfigError::Invalid(format!("Store name '{}' is reserved", store.name)));
            }
            if !seen.insert(store.name.as_str()) {
                return Err(ConfigError::Schema(SchemaError::DuplicateStore(store.name.clone())));
            }
        }

        self.registry().map(|_| ())
    }

    /// Builds the schema registry for the declared stores
    pub fn registry(&self) -> ConfigResult<SchemaRegistry> {
        let mut registry = SchemaRegistry::new(self.schema_version);
        for store in &self.stores {
            registry.register(store.clone())?;
        }
        Ok(registry)
    }

    /// Configured log severity, `Error` if unparseable
    pub fn log_severity(&self) -> Severity {
        Severity::parse(&self.log_level).unwrap_or(Severity::Error)
    }
}
