//! Job and project state machines plus their stored snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::OrchestratorError;

/// Kind tag of a background job. Stored as a short string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Ingest,
    Analyze,
    RenderVariants,
    Export,
    Scrape,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Ingest => "ingest",
            JobKind::Analyze => "analyze",
            JobKind::RenderVariants => "render_variants",
            JobKind::Export => "export",
            JobKind::Scrape => "scrape",
        }
    }

    /// Project status a subject is rolled back to when a job of this kind
    /// is recovered (stuck or failed).
    pub fn rollback_status(&self) -> ProjectStatus {
        match self {
            JobKind::Ingest | JobKind::Scrape => ProjectStatus::Created,
            JobKind::Analyze => ProjectStatus::Ingested,
            JobKind::RenderVariants | JobKind::Export => ProjectStatus::Analyzed,
        }
    }

    /// Transient project status a live job of this kind covers, if any.
    pub fn transient_status(&self) -> Option<ProjectStatus> {
        match self {
            JobKind::Ingest => Some(ProjectStatus::Ingesting),
            JobKind::Analyze => Some(ProjectStatus::Analyzing),
            JobKind::Export => Some(ProjectStatus::Exporting),
            JobKind::RenderVariants | JobKind::Scrape => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ingest" => Ok(JobKind::Ingest),
            "analyze" => Ok(JobKind::Analyze),
            "render_variants" => Ok(JobKind::RenderVariants),
            "export" => Ok(JobKind::Export),
            "scrape" => Ok(JobKind::Scrape),
            other => Err(OrchestratorError::StoreInconsistency(format!(
                "unknown job kind: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a job.
///
/// Transitions form a DAG: Pending -> Running -> {Completed, Failed,
/// Cancelled}, plus Pending -> Cancelled. The only backward edge is the
/// startup recovery reset Running -> Pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Pending or Running: the job still occupies its (subject, kind) slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(OrchestratorError::StoreInconsistency(format!(
                "unknown job status: {other}"
            ))),
        }
    }
}

/// Full snapshot of a job row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub project_id: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub stage: String,
    pub message: String,
    pub error: Option<String>,
    pub payload: Value,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Retry count carried in the payload as a preserved metadata field.
    /// Absent means zero.
    pub fn retry_count(&self) -> u32 {
        self.payload
            .get(crate::payloads::RETRY_COUNT_FIELD)
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    }
}

/// Lifecycle status of a project (the job subject).
///
/// Transient states end in "-ing" and are expected to be covered by a live
/// job; the supervisor rolls orphaned transient projects back one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Created,
    Downloading,
    Ingesting,
    Ingested,
    Analyzing,
    Analyzed,
    Exporting,
    Ready,
    Error,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Created => "created",
            ProjectStatus::Downloading => "downloading",
            ProjectStatus::Ingesting => "ingesting",
            ProjectStatus::Ingested => "ingested",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Analyzed => "analyzed",
            ProjectStatus::Exporting => "exporting",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Error => "error",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Downloading
                | ProjectStatus::Ingesting
                | ProjectStatus::Analyzing
                | ProjectStatus::Exporting
        )
    }

    /// Stage a transient project falls back to when its job disappears.
    /// Terminal statuses map to themselves.
    pub fn rollback_status(&self) -> ProjectStatus {
        match self {
            ProjectStatus::Downloading | ProjectStatus::Ingesting => ProjectStatus::Created,
            ProjectStatus::Analyzing => ProjectStatus::Ingested,
            ProjectStatus::Exporting => ProjectStatus::Analyzed,
            other => *other,
        }
    }

    /// Job kind expected to be live while a project sits in this status.
    pub fn covering_kind(&self) -> Option<JobKind> {
        match self {
            ProjectStatus::Downloading | ProjectStatus::Ingesting => Some(JobKind::Ingest),
            ProjectStatus::Analyzing => Some(JobKind::Analyze),
            ProjectStatus::Exporting => Some(JobKind::Export),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ProjectStatus::Created),
            "downloading" => Ok(ProjectStatus::Downloading),
            "ingesting" => Ok(ProjectStatus::Ingesting),
            "ingested" => Ok(ProjectStatus::Ingested),
            "analyzing" => Ok(ProjectStatus::Analyzing),
            "analyzed" => Ok(ProjectStatus::Analyzed),
            "exporting" => Ok(ProjectStatus::Exporting),
            "ready" => Ok(ProjectStatus::Ready),
            "error" => Ok(ProjectStatus::Error),
            other => Err(OrchestratorError::StoreInconsistency(format!(
                "unknown project status: {other}"
            ))),
        }
    }
}

/// Snapshot of a project row. The core reads domain fields and mutates
/// status only as part of sequencing or recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub source_path: String,
    pub source_filename: String,
    pub duration: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub audio_tracks: i64,
    pub proxy_path: Option<String>,
    pub audio_path: Option<String>,
    pub thumbnail_path: Option<String>,
    pub status: ProjectStatus,
    pub error_message: Option<String>,
    pub meta: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    /// Stored policy flag consulted by the sequencer and the supervisor's
    /// continuity scan. Absent means enabled.
    pub fn auto_analyze(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|m| m.get("auto_analyze"))
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// A scored candidate sub-clip produced by the Analyze stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub project_id: String,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
    pub topic_label: Option<String>,
    pub hook_text: Option<String>,
    pub transcript: Option<String>,
    pub score_total: f64,
    pub score_breakdown: Option<Value>,
    pub created_at: DateTime<Utc>,
}
