//! Database manifest handling
//!
//! The manifest records:
//! - name: database name (also the directory name)
//! - version: schema version the database was last opened with
//! - stores: every store ever created, with its indexes
//! - created_at / upgraded_at: RFC3339 timestamps
//! - format_version: always 1
//!
//! Location: `<root>/<name>/manifest.json`
//!
//! Written to a temporary file, fsynced, then renamed over the old manifest.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::errors::{StorageError, StorageResult};
use crate::schema::{IndexDefinition, SchemaRegistry, StoreDefinition};

/// Current manifest format
pub const MANIFEST_FORMAT_VERSION: u8 = 1;

/// Persistent description of a database directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseManifest {
    pub name: String,
    pub version: u32,
    pub stores: Vec<StoreDefinition>,
    pub created_at: String,
    pub upgraded_at: String,
    pub format_version: u8,
}

/// What applying a registry changed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpgradeOutcome {
    pub previous_version: u32,
    pub created_stores: Vec<String>,
    pub created_indexes: Vec<String>,
}

impl UpgradeOutcome {
    /// Returns whether the manifest must be rewritten
    pub fn changed(&self, manifest: &DatabaseManifest) -> bool {
        self.previous_version != manifest.version
            || !self.created_stores.is_empty()
            || !self.created_indexes.is_empty()
    }
}

impl DatabaseManifest {
    /// Manifest for a brand new database
    pub fn new(name: &str, created_at: &str) -> Self {
        Self {
            name: name.to_string(),
            version: 0,
            stores: Vec::new(),
            created_at: created_at.to_string(),
            upgraded_at: created_at.to_string(),
            format_version: MANIFEST_FORMAT_VERSION,
        }
    }

    /// Looks up a store
    pub fn store(&self, name: &str) -> Option<&StoreDefinition> {
        self.stores.iter().find(|s| s.name == name)
    }

    /// Adds every declared store and index missing from the manifest.
    ///
    /// Nothing on disk is ever dropped. Fails with a version conflict when
    /// the manifest is newer than the registry.
    pub fn apply(&mut self, registry: &SchemaRegistry, now: &str) -> StorageResult<UpgradeOutcome> {
        if self.version > registry.version() {
            return Err(StorageError::version_conflict(self.version, registry.version()));
        }

        let mut outcome = UpgradeOutcome {
            previous_version: self.version,
            ..UpgradeOutcome::default()
        };

        for declared in registry.stores() {
            match self.stores.iter_mut().find(|s| s.name == declared.name) {
                None => {
                    outcome.created_stores.push(declared.name.clone());
                    self.stores.push(declared.clone());
                }
                Some(existing) => {
                    let missing: Vec<IndexDefinition> = declared
                        .indexes
                        .iter()
                        .filter(|i| existing.index(&i.name).is_none())
                        .cloned()
                        .collect();
                    for index in missing {
                        outcome
                            .created_indexes
                            .push(format!("{}.{}", existing.name, index.name));
                        existing.indexes.push(index);
                    }
                }
            }
        }

        self.version = registry.version();
        if outcome.changed(self) {
            self.upgraded_at = now.to_string();
        }
        Ok(outcome)
    }

    /// Serializes the manifest to JSON
    pub fn to_json(&self) -> StorageResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            StorageError::write_failed(
                format!("Failed to serialize manifest: {}", e),
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    /// Deserializes the manifest from JSON
    pub fn from_json(json: &str) -> StorageResult<Self> {
        let manifest: Self = serde_json::from_str(json)
            .map_err(|e| StorageError::data_corruption(format!("Failed to parse manifest: {}", e)))?;
        if manifest.format_version != MANIFEST_FORMAT_VERSION {
            return Err(StorageError::open_failed_no_source(format!(
                "Unsupported manifest format version: {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }

    /// Writes the manifest atomically with fsync
    pub fn write_to_file(&self, path: &Path) -> StorageResult<()> {
        let json = self.to_json()?;
        let tmp_path = path.with_extension("json.tmp");

        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            // fsync is mandatory
            file.sync_all()?;
            fs::rename(&tmp_path, path)?;
            if let Some(parent) = path.parent() {
                OpenOptions::new().read(true).open(parent)?.sync_all()?;
            }
            Ok(())
        };

        write().map_err(|e| {
            StorageError::write_failed(format!("Failed to write manifest: {}", path.display()), e)
        })
    }

    /// Reads the manifest, `None` if the file does not exist
    pub fn read_from_file(path: &Path) -> StorageResult<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::open_failed(
                format!("Failed to read manifest: {}", path.display()),
                e,
            )),
        }
    }
}

/// Returns the path to a database's manifest
pub fn manifest_path(db_dir: &Path) -> PathBuf {
    db_dir.join("manifest.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_apply_creates_missing_stores() {
        let registry = SchemaRegistry::with_stores(2, ["notes"]).unwrap();
        let mut manifest = DatabaseManifest::new("tools-db", "2026-01-01T00:00:00Z");

        let outcome = manifest.apply(&registry, "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(outcome.previous_version, 0);
        assert!(outcome.created_stores.contains(&"notes".to_string()));
        assert_eq!(manifest.version, 2);
        assert!(manifest.store("preferences").is_some());
    }

    #[test]
    fn test_apply_never_drops_stores() {
        let mut manifest = DatabaseManifest::new("tools-db", "t0");
        manifest
            .apply(&SchemaRegistry::with_stores(1, ["old-tool"]).unwrap(), "t0")
            .unwrap();

        let outcome = manifest
            .apply(&SchemaRegistry::with_stores(2, ["new-tool"]).unwrap(), "t1")
            .unwrap();
        assert_eq!(outcome.created_stores, vec!["new-tool".to_string()]);
        assert!(manifest.store("old-tool").is_some());
        assert_eq!(manifest.upgraded_at, "t1");
    }

    #[test]
    fn test_apply_adds_indexes_to_existing_store() {
        let mut manifest = DatabaseManifest::new("tools-db", "t0");
        let mut registry = SchemaRegistry::with_stores(1, ["notes"]).unwrap();
        manifest.apply(&registry, "t0").unwrap();

        registry.bump_version(2).unwrap();
        registry
            .add_index("notes", IndexDefinition::new("by_tag", "tag"))
            .unwrap();
        let outcome = manifest.apply(&registry, "t1").unwrap();
        assert_eq!(outcome.created_indexes, vec!["notes.by_tag".to_string()]);
        assert!(manifest.store("notes").unwrap().index("by_tag").is_some());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let registry = SchemaRegistry::with_stores(1, ["notes"]).unwrap();
        let mut manifest = DatabaseManifest::new("tools-db", "t0");
        manifest.apply(&registry, "t0").unwrap();

        let outcome = manifest.apply(&registry, "t1").unwrap();
        assert!(!outcome.changed(&manifest));
        assert_eq!(manifest.upgraded_at, "t0");
    }

    #[test]
    fn test_newer_manifest_conflicts() {
        let mut manifest = DatabaseManifest::new("tools-db", "t0");
        manifest.version = 5;
        let err = manifest.apply(&SchemaRegistry::new(3), "t1").unwrap_err();
        assert_eq!(err.code(), super::super::errors::StorageErrorCode::VersionConflict);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = manifest_path(dir.path());
        assert!(DatabaseManifest::read_from_file(&path).unwrap().is_none());

        let mut manifest = DatabaseManifest::new("tools-db", "t0");
        manifest.apply(&SchemaRegistry::new(1), "t0").unwrap();
        manifest.write_to_file(&path).unwrap();

        let read = DatabaseManifest::read_from_file(&path).unwrap().unwrap();
        assert_eq!(read, manifest);
        assert!(!path.with_extension("json.tmp").exists());
    }
}
