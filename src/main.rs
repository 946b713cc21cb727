//! toolstore CLI entry point
//!
//! This is a minimal entrypoint that:
//! 1. Parses CLI arguments and dispatches commands (via cli::run)
//! 2. Reports errors as a JSON response and on stderr
//! 3. Exits with non-zero on failure
//!
//! All logic is delegated to the CLI module.

use toolstore::cli;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = cli::run().await {
        // stdout may be closed; stderr still carries the error
        let _ = cli::write_error(e.code_str(), e.message());
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
