//! toolstore - durable, integrity-checked local persistence for tool state
//!
//! Tools talk to [`facade::DataFacade`]. Behind it a log-structured primary
//! medium and a single-file fallback medium share one backend trait, legacy
//! records are migrated once per data directory, and whole datasets move in
//! and out as JSON bundles.

pub mod cli;
pub mod config;
pub mod facade;
pub mod integrity;
pub mod migration;
pub mod observability;
pub mod schema;
pub mod storage;
pub mod transfer;
