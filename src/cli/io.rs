//! JSON I/O for the CLI
//!
//! Every command prints exactly one JSON line on stdout, either
//! `{"status":"ok","data":...}` or `{"status":"error","code":...,"message":...}`.
//! `save` without `--data` reads its payload as one JSON document on stdin.

use std::io::{self, Read, Write};

use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

/// Reads the whole of stdin as one JSON document
pub fn read_payload() -> CliResult<Value> {
    let mut input = String::new();
    io::stdin().lock().read_to_string(&mut input)?;
    if input.trim().is_empty() {
        return Err(CliError::invalid_input("No payload given on stdin"));
    }
    Ok(serde_json::from_str(&input)?)
}

fn emit(line: &Value) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, line)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

/// Prints a success response
pub fn write_response(data: Value) -> CliResult<()> {
    emit(&json!({ "status": "ok", "data": data }))
}

/// Prints an error response
pub fn write_error(code: &str, message: &str) -> CliResult<()> {
    emit(&json!({ "status": "error", "code": code, "message": message }))
}
