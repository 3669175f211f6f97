//! Store error type and its mapping into the domain kinds.

use clipforge_protocol::OrchestratorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("not found: {0}")]
    NotFound(String),

    /// A stored row could not be decoded (unknown status string, bad JSON).
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => OrchestratorError::NotFound(what),
            other => OrchestratorError::StoreInconsistency(other.to_string()),
        }
    }
}
