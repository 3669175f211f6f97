//! Pipeline sequencer: the static edge table and per-stage preconditions.
//!
//! Edges:
//!
//! | Predecessor        | Guard                                   | Successor        |
//! |--------------------|-----------------------------------------|------------------|
//! | Ingest (download)  | `auto_ingest`                           | Ingest (prepare) |
//! | Ingest (prepare)   | `auto_analyze` and project is Ingested  | Analyze          |
//! | Analyze            | never (export requires user action)     | none             |
//!
//! Handlers evaluate their edge immediately before returning success so the
//! successor creation belongs to the same logical unit as the predecessor's
//! completion. A successor that fails to materialize is repaired by the
//! supervisor's workflow-continuity scan.

use clipforge_protocol::{
    AnalyzePayload, IngestMode, IngestPayload, JobKind, OrchestratorError, Project, ProjectStatus,
};
use clipforge_store::{steps, StepCache, Store, StoreError};
use serde_json::Value;
use std::path::Path;
use tracing::info;

/// A successor job derived from a completed predecessor.
#[derive(Debug, Clone)]
pub struct NextJob {
    pub kind: JobKind,
    pub payload: Value,
}

/// Edge evaluation for a completed Ingest job. At most once per completion.
pub fn ingest_successor(payload: &IngestPayload, project: &Project) -> Option<NextJob> {
    match payload.mode {
        IngestMode::Download if payload.auto_ingest => {
            let mut next = payload.clone();
            next.mode = IngestMode::Prepare;
            next.source_url = None;
            Some(NextJob {
                kind: JobKind::Ingest,
                payload: serde_json::to_value(next).unwrap_or(Value::Null),
            })
        }
        IngestMode::Prepare
            if payload.auto_analyze && project.status == ProjectStatus::Ingested =>
        {
            Some(NextJob {
                kind: JobKind::Analyze,
                payload: serde_json::to_value(AnalyzePayload::default())
                    .unwrap_or(Value::Null),
            })
        }
        _ => None,
    }
}

/// Create the successor unless an equivalent live job already exists. The
/// at-most-one-active invariant per (project, kind) is enforced here; the
/// predecessor itself is still Running while it evaluates its edge, so it
/// is excluded from the check.
pub async fn create_successor(
    store: &Store,
    project_id: &str,
    predecessor_job_id: &str,
    next: NextJob,
) -> Result<Option<clipforge_protocol::Job>, StoreError> {
    if store
        .jobs
        .has_active_excluding(project_id, next.kind, predecessor_job_id)
        .await?
    {
        info!(project_id, kind = %next.kind, "successor already live, skipping");
        return Ok(None);
    }
    let job = store
        .jobs
        .create(next.kind, Some(project_id), next.payload)
        .await?;
    info!(project_id, kind = %next.kind, job_id = %job.id, "chained successor job");
    Ok(Some(job))
}

/// Ingest(prepare) requires the source to be materialized on disk.
pub fn check_prepare_preconditions(project: &Project) -> Result<(), OrchestratorError> {
    if !Path::new(&project.source_path).exists() {
        return Err(OrchestratorError::Precondition(format!(
            "source file not found: {}",
            project.source_path
        )));
    }
    Ok(())
}

/// Analyze requires the extracted-audio artifact from ingest.
pub fn check_analyze_preconditions(project: &Project) -> Result<(), OrchestratorError> {
    match project.audio_path.as_deref() {
        Some(path) if Path::new(path).exists() => Ok(()),
        Some(path) => Err(OrchestratorError::Precondition(format!(
            "extracted audio missing on disk: {path}"
        ))),
        None => Err(OrchestratorError::Precondition(
            "project has no extracted audio; ingest it first".to_string(),
        )),
    }
}

/// Export requires at least one stored candidate segment and a transcript
/// cache entry.
pub fn check_export_preconditions(
    segment_count: i64,
    cache: &StepCache,
) -> Result<(), OrchestratorError> {
    if segment_count == 0 {
        return Err(OrchestratorError::Precondition(
            "project has no candidate segments; analyze it first".to_string(),
        ));
    }
    if !cache.contains(steps::TRANSCRIPT) {
        return Err(OrchestratorError::Precondition(
            "transcript cache entry missing; analyze it first".to_string(),
        ));
    }
    Ok(())
}
