//! Core error type for the Papermill engine.
//!
//! `CoreError` is used throughout the core domain (stores, engine surface,
//! template loading). Domain-level failures of sub-agent calls use the
//! serializable `contract::ErrorInfo` taxonomy instead; `CoreError` is for
//! infrastructure and caller mistakes.

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Internal(format!("JSON serialization failed: {}", e))
    }
}
