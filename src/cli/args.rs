//! CLI argument definitions using clap
//!
//! Commands:
//! - toolstore init --data-dir <dir>
//! - toolstore save|load|delete <store> <key>
//! - toolstore keys <store>
//! - toolstore find <store> <index> <value>
//! - toolstore export [--output <file>] [--store <name>]...
//! - toolstore import <file> [--mode replace|merge]
//! - toolstore migrate | info | clear | compact
//!
//! Every command takes `--config <path>`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::transfer::ImportMode;

/// Toolstore - durable local storage for tool state
#[derive(Parser, Debug)]
#[command(name = "toolstore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration and create the database
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        /// Data directory recorded in the new configuration
        #[arg(long)]
        data_dir: PathBuf,
    },

    /// Save a JSON payload
    Save {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        store: String,
        key: String,

        /// Payload as JSON; read from stdin when omitted
        #[arg(long)]
        data: Option<String>,
    },

    /// Load a payload
    Load {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        store: String,
        key: String,
    },

    /// Delete a key
    Delete {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        store: String,
        key: String,
    },

    /// List the keys of a store
    Keys {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        store: String,
    },

    /// List keys whose indexed field equals a JSON value
    Find {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        store: String,
        index: String,

        /// Value as JSON, e.g. '"done"' or 42
        value: String,
    },

    /// Export a bundle
    Export {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        /// Bundle file; printed in the response when omitted
        #[arg(long)]
        output: Option<PathBuf>,

        /// Only export these stores (repeatable)
        #[arg(long = "store")]
        stores: Vec<String>,
    },

    /// Import a bundle file
    Import {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,

        input: PathBuf,

        #[arg(long, default_value = "merge")]
        mode: ImportMode,
    },

    /// Run legacy migration and report the outcome
    Migrate {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,
    },

    /// Show quota, usage and the active medium
    Info {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,
    },

    /// Delete every tool record and preference
    Clear {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,
    },

    /// Rewrite store logs without dead records
    Compact {
        /// Path to configuration file
        #[arg(long, default_value = "./toolstore.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
