//! Handler registry: job kind -> executable handler.
//!
//! Registrations happen during service startup through the builder; the
//! built registry is immutable. Claiming a job whose kind has no handler
//! fails the job with a clear error (see the dispatcher).

use async_trait::async_trait;
use clipforge_protocol::{JobKind, OrchestratorError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::JobContext;

/// Executable logic associated with a job kind.
///
/// The return value becomes the job result on success; an error becomes the
/// job's failure record. A handler that observes cancellation returns
/// [`OrchestratorError::Cancelled`]; its result is discarded either way.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<Value, OrchestratorError>;
}

/// Mutable registration surface, consumed at startup.
#[derive(Default)]
pub struct RegistryBuilder {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: JobKind, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// Freeze the registrations.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<JobKind, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn resolve(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn registered_kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl JobHandler for NoopHandler {
        async fn run(&self, _ctx: JobContext) -> Result<Value, OrchestratorError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_resolve_registered_kind() {
        let registry = RegistryBuilder::new()
            .register(JobKind::Ingest, Arc::new(NoopHandler))
            .build();
        assert!(registry.resolve(JobKind::Ingest).is_some());
        assert!(registry.resolve(JobKind::Export).is_none());
        assert_eq!(registry.registered_kinds(), vec![JobKind::Ingest]);
    }
}
