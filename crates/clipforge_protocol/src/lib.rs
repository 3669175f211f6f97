//! Shared vocabulary for the Clipforge orchestrator.
//!
//! Everything the store, engine, supervisor and media collaborators agree on
//! lives here: job and project state machines, per-kind payload records, bus
//! event shapes, domain error kinds, configuration and canonical defaults.
//! This crate performs no I/O.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod payloads;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::OrchestratorError;
pub use events::{
    BusEvent, GpuSnapshot, HealthState, JobCounts, LogEvent, LogSummary, ResourceSnapshot,
    ServiceHealth, SubjectUpdate, SupervisorStatus, TickReport,
};
pub use payloads::{
    AnalyzePayload, ExportPayload, IngestMode, IngestPayload, VariantsPayload, RETRY_COUNT_FIELD,
};
pub use types::{Job, JobKind, JobStatus, Project, ProjectStatus, Segment};
