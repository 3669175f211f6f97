//! Event shapes carried on the progress bus and the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Job, ProjectStatus};

/// Everything the bus fans out. `JobUpdate` carries the full job snapshot;
/// the other classes are intentionally narrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BusEvent {
    JobUpdate(Job),
    SubjectUpdate(SubjectUpdate),
    SupervisorStatus(SupervisorStatus),
    SupervisorLog(LogEvent),
}

impl BusEvent {
    /// Job id this event belongs to, for per-job listener routing.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            BusEvent::JobUpdate(job) => Some(&job.id),
            _ => None,
        }
    }
}

/// Minimal project identification pushed when a lifecycle status changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectUpdate {
    pub project_id: String,
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// One probe result for an external collaborator service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub name: String,
    pub state: HealthState,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Host resource snapshot. Missing capabilities yield `None`; the probe
/// itself never fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub name: String,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub utilization_percent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LogSummary {
    pub total: usize,
    pub errors: usize,
    pub warnings: usize,
}

/// Aggregate snapshot broadcast at the end of each supervisor tick and
/// returned by the `SupervisorStatus` control call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorStatus {
    pub uptime_seconds: u64,
    pub cycle: u64,
    pub auto_recovery: bool,
    pub resources: ResourceSnapshot,
    pub services: Vec<ServiceHealth>,
    pub jobs: JobCounts,
    pub stuck_jobs: usize,
    pub logs: LogSummary,
}

/// What a single supervisor tick actually did.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickReport {
    pub services_checked: usize,
    pub stuck_recovered: usize,
    pub orphans_recovered: usize,
    pub retries_started: usize,
    pub continuity_actions: usize,
}

impl TickReport {
    pub fn total_actions(&self) -> usize {
        self.stuck_recovered + self.orphans_recovered + self.retries_started + self.continuity_actions
    }
}
