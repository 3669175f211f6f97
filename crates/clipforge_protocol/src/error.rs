//! Domain error kinds shared across the orchestrator.

use thiserror::Error;

/// Errors surfaced by the core to callers and handlers.
///
/// These are domain kinds, not transport codes: the HTTP collaborator maps
/// `NotFound` to 404, `Precondition` to 409 and `StoreInconsistency` to 5xx.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Job or subject id unknown. Surfaced verbatim.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stage guard failed (e.g. analyze before ingest). The project's
    /// status is left unchanged.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// An external tool returned non-zero or produced invalid output. The
    /// project is rolled back one stage.
    #[error("handler failure: {0}")]
    HandlerFailure(String),

    /// Supervisor-synthesized: no progress within the stuck threshold.
    #[error("stuck: {0}")]
    Stuck(String),

    /// Explicit cancellation. Never retried.
    #[error("cancelled")]
    Cancelled,

    /// Write conflict or corruption in the store. Logged at error level and
    /// never auto-retried.
    #[error("store inconsistency: {0}")]
    StoreInconsistency(String),
}

impl OrchestratorError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, OrchestratorError::Cancelled)
    }
}
