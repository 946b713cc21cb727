//! Store and index declarations
//!
//! A registry is a versioned list of stores. Stores and indexes can only be
//! added, never removed or redefined; each addition records the registry
//! version it arrived with so the engine can tell what an upgrade introduces.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};

/// Store holding user preferences; exported as `Bundle::preferences`
pub const PREFERENCES_STORE: &str = "preferences";

/// Store holding internal bookkeeping such as the migration state
pub const SYSTEM_STORE: &str = "system";

/// Default primary key path for declared stores
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Returns whether `name` is one of the built-in stores
pub fn is_reserved_store(name: &str) -> bool {
    name == PREFERENCES_STORE || name == SYSTEM_STORE
}

/// Validates a store name; names double as file names on disk
pub fn validate_store_name(name: &str) -> SchemaResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidStoreName(name.to_string()))
    }
}

/// Secondary index over a payload field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    /// Index name, unique within its store
    pub name: String,
    /// Dot-separated path into the payload object (`meta.title`)
    pub key_path: String,
    /// Whether two records may share an indexed value
    #[serde(default)]
    pub unique: bool,
    /// Registry version that introduced the index
    #[serde(default = "first_version")]
    pub since_version: u32,
}

fn first_version() -> u32 {
    1
}

impl IndexDefinition {
    /// Non-unique index
    pub fn new(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: key_path.into(),
            unique: false,
            since_version: 1,
        }
    }

    /// Unique index
    pub fn unique(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            unique: true,
            ..Self::new(name, key_path)
        }
    }

    /// Extracts the indexed value from a payload.
    ///
    /// Returns `None` when the path does not resolve or resolves to `null`;
    /// such records are simply absent from the index.
    pub fn extract<'a>(&self, payload: &'a Value) -> Option<&'a Value> {
        let mut current = payload;
        for segment in self.key_path.split('.') {
            current = current.as_object()?.get(segment)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn validate_key_path(path: &str) -> SchemaResult<()> {
    if path.is_empty() || path.split('.').any(|s| s.is_empty()) {
        return Err(SchemaError::InvalidKeyPath(path.to_string()));
    }
    Ok(())
}

/// A named logical table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDefinition {
    pub name: String,
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    #[serde(default)]
    pub indexes: Vec<IndexDefinition>,
    /// Registry version that introduced the store
    #[serde(default = "first_version")]
    pub since_version: u32,
}

impl StoreDefinition {
    /// Store keyed by the default primary key path
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            indexes: Vec::new(),
            since_version: 1,
        }
    }

    /// Builder: set the primary key path
    pub fn with_primary_key(mut self, key_path: impl Into<String>) -> Self {
        self.primary_key = key_path.into();
        self
    }

    /// Builder: declare an index
    pub fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }

    /// Looks up an index by name
    pub fn index(&self, name: &str) -> Option<&IndexDefinition> {
        self.indexes.iter().find(|i| i.name == name)
    }
}

/// Versioned set of store declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaRegistry {
    version: u32,
    stores: BTreeMap<String, StoreDefinition>,
}

impl SchemaRegistry {
    /// Creates a registry at `version` holding only the built-in stores
    pub fn new(version: u32) -> Self {
        let version = version.max(1);
        let mut stores = BTreeMap::new();
        for name in [PREFERENCES_STORE, SYSTEM_STORE] {
            stores.insert(name.to_string(), StoreDefinition::new(name).with_primary_key("key"));
        }
        Self { version, stores }
    }

    /// Creates a registry with the built-in stores plus one plain store per name
    pub fn with_stores<I, S>(version: u32, names: I) -> SchemaResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = Self::new(version);
        for name in names {
            registry.register(StoreDefinition::new(name))?;
        }
        Ok(registry)
    }

    /// Current schema version
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Raises the schema version. Versions only move forward.
    pub fn bump_version(&mut self, version: u32) -> SchemaResult<()> {
        if version <= self.version {
            return Err(SchemaError::VersionNotIncreasing {
                current: self.version,
                requested: version,
            });
        }
        self.version = version;
        Ok(())
    }

    /// Declares a new store at the current version
    pub fn register(&mut self, mut definition: StoreDefinition) -> SchemaResult<()> {
        validate_store_name(&definition.name)?;
        validate_key_path(&definition.primary_key)?;
        if self.stores.contains_key(&definition.name) {
            return Err(SchemaError::DuplicateStore(definition.name));
        }

        let mut seen = Vec::with_capacity(definition.indexes.len());
        for index in &mut definition.indexes {
            validate_key_path(&index.key_path)?;
            if seen.contains(&index.name) {
                return Err(SchemaError::DuplicateIndex {
                    store: definition.name.clone(),
                    index: index.name.clone(),
                });
            }
            seen.push(index.name.clone());
            index.since_version = self.version;
        }

        definition.since_version = self.version;
        self.stores.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Adds an index to an existing store at the current version
    pub fn add_index(&mut self, store: &str, mut index: IndexDefinition) -> SchemaResult<()> {
        validate_key_path(&index.key_path)?;
        let version = self.version;
        let definition = self
            .stores
            .get_mut(store)
            .ok_or_else(|| SchemaError::UnknownStore(store.to_string()))?;
        if definition.index(&index.name).is_some() {
            return Err(SchemaError::DuplicateIndex {
                store: store.to_string(),
                index: index.name,
            });
        }
        index.since_version = version;
        definition.indexes.push(index);
        Ok(())
    }

    /// Looks up a store declaration
    pub fn store(&self, name: &str) -> Option<&StoreDefinition> {
        self.stores.get(name)
    }

    /// Returns whether the store is declared
    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }

    /// All declarations, ordered by name
    pub fn stores(&self) -> impl Iterator<Item = &StoreDefinition> {
        self.stores.values()
    }

    /// All store names, ordered
    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_registry_has_reserved_stores() {
        let registry = SchemaRegistry::new(1);
        assert!(registry.contains(PREFERENCES_STORE));
        assert!(registry.contains(SYSTEM_STORE));
        assert!(is_reserved_store("system"));
        assert!(!is_reserved_store("notes"));
    }

    #[test]
    fn test_register_records_version() {
        let mut registry = SchemaRegistry::new(2);
        registry
            .register(StoreDefinition::new("notes").with_index(IndexDefinition::new("by_title", "title")))
            .unwrap();

        let store = registry.store("notes").unwrap();
        assert_eq!(store.since_version, 2);
        assert_eq!(store.indexes[0].since_version, 2);
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let mut registry = SchemaRegistry::with_stores(1, ["notes"]).unwrap();
        let err = registry.register(StoreDefinition::new("notes")).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateStore("notes".into()));
    }

    #[test]
    fn test_invalid_store_names() {
        assert!(validate_store_name("calculator-history").is_ok());
        assert!(validate_store_name("").is_err());
        assert!(validate_store_name("../etc").is_err());
        assert!(validate_store_name("has space").is_err());
        assert!(validate_store_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_version_only_moves_forward() {
        let mut registry = SchemaRegistry::new(3);
        assert!(registry.bump_version(3).is_err());
        assert!(registry.bump_version(2).is_err());
        registry.bump_version(4).unwrap();
        assert_eq!(registry.version(), 4);
    }

    #[test]
    fn test_add_index_after_bump() {
        let mut registry = SchemaRegistry::with_stores(1, ["todo-lists"]).unwrap();
        registry.bump_version(2).unwrap();
        registry
            .add_index("todo-lists", IndexDefinition::unique("by_slug", "slug"))
            .unwrap();

        let index = registry.store("todo-lists").unwrap().index("by_slug").unwrap();
        assert!(index.unique);
        assert_eq!(index.since_version, 2);

        let err = registry
            .add_index("todo-lists", IndexDefinition::new("by_slug", "other"))
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateIndex { .. }));
        assert!(registry.add_index("missing", IndexDefinition::new("i", "x")).is_err());
    }

    #[test]
    fn test_index_extract_nested_path() {
        let index = IndexDefinition::new("by_author", "meta.author");
        let payload = json!({"meta": {"author": "ada"}, "title": "t"});
        assert_eq!(index.extract(&payload), Some(&json!("ada")));
        assert_eq!(index.extract(&json!({"meta": {}})), None);
        assert_eq!(index.extract(&json!({"meta": {"author": null}})), None);
        assert_eq!(index.extract(&json!("scalar")), None);
    }

    #[test]
    fn test_empty_key_path_segment_rejected() {
        let mut registry = SchemaRegistry::new(1);
        let err = registry
            .register(StoreDefinition::new("notes").with_index(IndexDefinition::new("bad", "a..b")))
            .unwrap_err();
        assert_eq!(err, SchemaError::InvalidKeyPath("a..b".into()));
    }
}
