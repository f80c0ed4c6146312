//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses the
//! papermill-core domain logic through the shared `Engine` handle.

pub mod revise;
pub mod run;
pub mod task;

use papermill_core::supervisor::SupervisorConfig;
use papermill_core::{Engine, EngineInner};

/// Open the SQLite database and wire up an engine with the demo
/// providers.
pub fn init_engine(db_path: &str, config: SupervisorConfig) -> Engine {
    let db = papermill_core::Database::open(db_path).unwrap_or_else(|e| {
        eprintln!("Failed to open database '{}': {}", db_path, e);
        std::process::exit(1);
    });
    tracing::debug!("[Cli] opened database '{}'", db_path);
    EngineInner::demo(db, config).unwrap_or_else(|e| {
        eprintln!("Failed to initialize engine: {}", e);
        std::process::exit(1);
    })
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
