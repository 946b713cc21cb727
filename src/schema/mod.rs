//! Schema registry
//!
//! Declares the named stores of the primary database, their primary key path
//! and secondary indexes, together with a monotonically increasing schema
//! version. The storage engine applies a registry when it opens the database;
//! it creates whatever is declared but missing and never drops anything.

mod errors;
mod registry;

pub use errors::{SchemaError, SchemaResult};
pub use registry::{
    is_reserved_store, validate_store_name, IndexDefinition, SchemaRegistry, StoreDefinition,
    DEFAULT_PRIMARY_KEY, PREFERENCES_STORE, SYSTEM_STORE,
};
