//! SQLite database layer for the Papermill engine.
//!
//! Uses rusqlite with WAL mode for concurrent read performance.
//! All database operations are executed via `tokio::task::spawn_blocking`
//! to avoid blocking the async runtime.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

/// Thread-safe handle to the SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(db_path: &str) -> Result<Self, CoreError> {
        let path = Path::new(db_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CoreError::Database(format!("Failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;

        tracing::info!("SQLite database opened at: {}", db_path);
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::Database(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| CoreError::Database(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.initialize_tables()?;
        Ok(db)
    }

    /// Execute a closure with access to the database connection.
    /// Automatically handles locking and error conversion.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::Database(format!("Lock poisoned: {}", e)))?;
        f(&conn).map_err(|e| CoreError::Database(e.to_string()))
    }

    /// Execute a closure with access to the database connection (async-friendly).
    pub async fn with_conn_async<F, T>(&self, f: F) -> Result<T, CoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || db.with_conn(f))
            .await
            .map_err(|e| CoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Create all tables if they don't exist.
    fn initialize_tables(&self) -> Result<(), CoreError> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tasks (
                    id                  TEXT PRIMARY KEY,
                    owner_id            TEXT NOT NULL,
                    workflow            TEXT NOT NULL,
                    topic               TEXT NOT NULL,
                    dataset             TEXT NOT NULL DEFAULT '{}',
                    checklist           TEXT NOT NULL DEFAULT 'consort',
                    status              TEXT NOT NULL DEFAULT 'PENDING',
                    current_step        TEXT,
                    revision_round      INTEGER NOT NULL DEFAULT 0,
                    refs                TEXT NOT NULL DEFAULT '[]',
                    stats_report        TEXT,
                    sections            TEXT NOT NULL DEFAULT '{}',
                    pending_sections    TEXT NOT NULL DEFAULT '[]',
                    manuscript          TEXT,
                    compliance_report   TEXT,
                    revision_notes      TEXT NOT NULL DEFAULT '[]',
                    last_error          TEXT,
                    created_at          INTEGER NOT NULL,
                    updated_at          INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

                CREATE TABLE IF NOT EXISTS messages (
                    id              TEXT PRIMARY KEY,
                    task_id         TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                    seq             INTEGER NOT NULL,
                    sender          TEXT NOT NULL,
                    receiver        TEXT NOT NULL,
                    intent          TEXT NOT NULL,
                    status          TEXT NOT NULL,
                    input           TEXT NOT NULL DEFAULT 'null',
                    output          TEXT,
                    error           TEXT,
                    latency_ms      INTEGER,
                    input_tokens    INTEGER,
                    output_tokens   INTEGER,
                    created_at      INTEGER NOT NULL,
                    UNIQUE (task_id, seq)
                );
                CREATE INDEX IF NOT EXISTS idx_messages_task ON messages(task_id);
                ",
            )
        })
    }
}
