//! Job store: durable record of every job's identity, stage, progress,
//! payload, result and timestamps.
//!
//! Claiming is atomic via a single `UPDATE ... WHERE status = 'pending'`
//! statement, so any number of concurrent workers receive each job at most
//! once. Terminal transitions are guarded the same way: a progress update
//! racing a finish can never resurrect a terminal row.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clipforge_protocol::{Job, JobCounts, JobKind, JobStatus};
use serde_json::Value;
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

use crate::StoreError;

#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    kind: String,
    project_id: Option<String>,
    status: String,
    progress: f64,
    stage: String,
    message: String,
    error: Option<String>,
    payload: Option<String>,
    result: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn into_job(self) -> Result<Job, StoreError> {
        let kind: JobKind = self
            .kind
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("job {}: kind {}", self.id, self.kind)))?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("job {}: status {}", self.id, self.status)))?;
        Ok(Job {
            kind,
            status,
            payload: parse_json(self.payload.as_deref())?.unwrap_or(Value::Null),
            result: parse_json(self.result.as_deref())?,
            created_at: parse_timestamp(&self.id, &self.created_at)?,
            started_at: parse_optional_timestamp(&self.id, self.started_at.as_deref())?,
            completed_at: parse_optional_timestamp(&self.id, self.completed_at.as_deref())?,
            id: self.id,
            project_id: self.project_id,
            progress: self.progress,
            stage: self.stage,
            message: self.message,
            error: self.error,
        })
    }
}

fn parse_json(raw: Option<&str>) -> Result<Option<Value>, StoreError> {
    match raw {
        None => Ok(None),
        Some(text) => {
            let value: Value = serde_json::from_str(text)?;
            if value.is_null() {
                Ok(None)
            } else {
                Ok(Some(value))
            }
        }
    }
}

fn parse_timestamp(id: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("job {id}: timestamp {raw}")))
}

fn parse_optional_timestamp(
    id: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|value| parse_timestamp(id, value)).transpose()
}

const SELECT_COLUMNS: &str = "id, kind, project_id, status, progress, stage, message, error, \
                              payload, result, created_at, started_at, completed_at";

impl JobStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Create a job in Pending with an assigned id and creation timestamp.
    pub async fn create(
        &self,
        kind: JobKind,
        project_id: Option<&str>,
        payload: Value,
    ) -> Result<Job, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, project_id, status, payload, created_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            "#,
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(project_id)
        .bind(serde_json::to_string(&payload)?)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        info!(job_id = %id, kind = %kind, "created job");
        self.get(&id).await
    }

    /// Atomically claim the oldest Pending job created within the freshness
    /// window, transitioning it to Running. Safe under concurrent callers:
    /// the status guard makes each row claimable exactly once.
    pub async fn claim_next(&self, freshness_hours: i64) -> Result<Option<Job>, StoreError> {
        let cutoff = (Utc::now() - ChronoDuration::hours(freshness_hours)).to_rfc3339();
        let now = Utc::now().to_rfc3339();

        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE jobs SET status = 'running', started_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND created_at > ?
                ORDER BY created_at ASC
                LIMIT 1
            ) AND status = 'pending'
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(&now)
        .bind(&cutoff)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = row.into_job()?;
                info!(job_id = %job.id, kind = %job.kind, "claimed job");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Record progress for a Running job. A no-op for any other status, and
    /// progress never moves backwards.
    pub async fn update_progress(
        &self,
        id: &str,
        progress: f64,
        stage: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET progress = CASE WHEN ? > progress THEN ? ELSE progress END,
                stage = ?,
                message = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(progress)
        .bind(progress)
        .bind(stage)
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a job to a terminal status. Idempotent: once terminal, further
    /// finishes (and progress updates) are no-ops. Returns whether this call
    /// performed the transition.
    pub async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<Value>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        debug_assert!(status.is_terminal());
        let result_text = result.map(|v| serde_json::to_string(&v)).transpose()?;
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?,
                progress = CASE WHEN ? = 'completed' THEN 100.0 ELSE progress END,
                result = COALESCE(?, result),
                error = ?,
                completed_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(status.as_str())
        .bind(status.as_str())
        .bind(result_text)
        .bind(error)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            info!(job_id = %id, status = %status, "job finished");
        }
        Ok(rows > 0)
    }

    /// Cancel a Pending or Running job. Returns false when the job is
    /// already terminal.
    pub async fn cancel(&self, id: &str) -> Result<bool, StoreError> {
        self.finish(id, JobStatus::Cancelled, None, None).await
    }

    pub async fn get(&self, id: &str) -> Result<Job, StoreError> {
        self.try_get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))
    }

    pub async fn try_get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Most recent jobs first, optionally restricted to one project.
    pub async fn list(
        &self,
        project_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let rows: Vec<JobRow> = match project_id {
            Some(project) => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM jobs WHERE project_id = ? \
                     ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(project)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {SELECT_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT ?"
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }

    pub async fn count_by_status(&self) -> Result<JobCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = JobCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "pending" => counts.pending = count,
                "running" => counts.running = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                "cancelled" => counts.cancelled = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Whether a Pending or Running job of `kind` exists for the project.
    pub async fn has_active(&self, project_id: &str, kind: JobKind) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE project_id = ? AND kind = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(project_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Like [`JobStore::has_active`], but ignoring one job id. Used when a
    /// still-Running predecessor evaluates a successor of its own kind.
    pub async fn has_active_excluding(
        &self,
        project_id: &str,
        kind: JobKind,
        excluded_job_id: &str,
    ) -> Result<bool, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE project_id = ? AND kind = ? AND status IN ('pending', 'running')
              AND id != ?
            "#,
        )
        .bind(project_id)
        .bind(kind.as_str())
        .bind(excluded_job_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Most recent job of `kind` for the project, regardless of status.
    pub async fn latest(
        &self,
        project_id: &str,
        kind: JobKind,
    ) -> Result<Option<Job>, StoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM jobs
            WHERE project_id = ? AND kind = ?
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(project_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Jobs that entered Failed within the lookback window, newest first.
    pub async fn failed_since(
        &self,
        lookback: std::time::Duration,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let cutoff = (Utc::now()
            - ChronoDuration::from_std(lookback).unwrap_or(ChronoDuration::zero()))
        .to_rfc3339();
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM jobs
            WHERE status = 'failed' AND completed_at > ?
            ORDER BY completed_at DESC
            LIMIT ?
            "#
        ))
        .bind(&cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Delete terminal jobs completed before the cutoff. Returns how many
    /// rows went away.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND completed_at IS NOT NULL
              AND completed_at < ?
            "#,
        )
        .bind(cutoff.to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows > 0 {
            info!(deleted = rows, "purged terminal jobs");
        }
        Ok(rows)
    }

    /// Startup recovery: any job still marked Running belonged to a dead
    /// process, so put it back in the queue with progress reset.
    pub async fn reset_orphaned_running(&self) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', progress = 0, stage = '', message = '', started_at = NULL
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows > 0 {
            info!(reset = rows, "reset orphaned running jobs to pending");
        }
        Ok(rows)
    }

    /// One-time repair for rows created under the old shape where job
    /// arguments were stashed in the result column. Must run before the
    /// dispatcher starts serving.
    pub async fn migrate_legacy_payloads(&self) -> Result<u64, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET payload = result, result = NULL
            WHERE status = 'pending'
              AND (payload IS NULL OR payload = 'null')
              AND result IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows > 0 {
            debug!(migrated = rows, "moved legacy job arguments out of result column");
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use serde_json::json;
    use std::collections::HashSet;

    async fn store() -> Store {
        Store::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_starts_pending() {
        let store = store().await;
        let job = store
            .jobs
            .create(JobKind::Ingest, Some("p1"), json!({"auto_analyze": true}))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.project_id.as_deref(), Some("p1"));
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn test_claim_oldest_first() {
        let store = store().await;
        let first = store.jobs.create(JobKind::Ingest, None, json!({})).await.unwrap();
        // created_at has sub-second precision; force distinct ordering.
        sqlx::query("UPDATE jobs SET created_at = ? WHERE id = ?")
            .bind((Utc::now() - ChronoDuration::minutes(1)).to_rfc3339())
            .bind(&first.id)
            .execute(store.pool())
            .await
            .unwrap();
        store.jobs.create(JobKind::Analyze, None, json!({})).await.unwrap();

        let claimed = store.jobs.claim_next(24).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id);
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(claimed.started_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_respects_freshness_window() {
        let store = store().await;
        let stale = store.jobs.create(JobKind::Ingest, None, json!({})).await.unwrap();
        sqlx::query("UPDATE jobs SET created_at = ? WHERE id = ?")
            .bind((Utc::now() - ChronoDuration::hours(30)).to_rfc3339())
            .bind(&stale.id)
            .execute(store.pool())
            .await
            .unwrap();

        assert!(store.jobs.claim_next(24).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_each_job_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(&dir.path().join("jobs.db")).await.unwrap();
        for _ in 0..8 {
            store.jobs.create(JobKind::Ingest, None, json!({})).await.unwrap();
        }

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let jobs = store.jobs.clone();
            tasks.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(job) = jobs.claim_next(24).await.unwrap() {
                    claimed.push(job.id);
                }
                claimed
            }));
        }

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id), "job claimed twice");
            }
        }
        assert_eq!(seen.len(), 8);
        assert!(store.jobs.claim_next(24).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_progress_requires_running_and_is_monotonic() {
        let store = store().await;
        let job = store.jobs.create(JobKind::Analyze, None, json!({})).await.unwrap();

        // Pending: progress updates are ignored.
        store.jobs.update_progress(&job.id, 10.0, "x", "y").await.unwrap();
        assert_eq!(store.jobs.get(&job.id).await.unwrap().progress, 0.0);

        let claimed = store.jobs.claim_next(24).await.unwrap().unwrap();
        store
            .jobs
            .update_progress(&claimed.id, 40.0, "transcription", "working")
            .await
            .unwrap();
        store
            .jobs
            .update_progress(&claimed.id, 30.0, "transcription", "late echo")
            .await
            .unwrap();
        let fetched = store.jobs.get(&claimed.id).await.unwrap();
        assert_eq!(fetched.progress, 40.0);
        assert_eq!(fetched.stage, "transcription");
    }

    #[tokio::test]
    async fn test_finish_is_terminal_and_idempotent() {
        let store = store().await;
        let job = store.jobs.create(JobKind::Export, None, json!({})).await.unwrap();
        store.jobs.claim_next(24).await.unwrap().unwrap();

        let applied = store
            .jobs
            .finish(&job.id, JobStatus::Completed, Some(json!({"clips": 2})), None)
            .await
            .unwrap();
        assert!(applied);

        // A late progress update must not resurrect the job.
        store.jobs.update_progress(&job.id, 55.0, "late", "").await.unwrap();
        // Nor a second finish.
        let reapplied = store
            .jobs
            .finish(&job.id, JobStatus::Failed, None, Some("boom"))
            .await
            .unwrap();
        assert!(!reapplied);

        let fetched = store.jobs.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.progress, 100.0);
        assert_eq!(fetched.result, Some(json!({"clips": 2})));
        assert!(fetched.error.is_none());
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let store = store().await;
        let job = store.jobs.create(JobKind::Ingest, None, json!({})).await.unwrap();
        assert!(store.jobs.cancel(&job.id).await.unwrap());
        assert_eq!(
            store.jobs.get(&job.id).await.unwrap().status,
            JobStatus::Cancelled
        );
        // Cancelled jobs are no longer claimable.
        assert!(store.jobs.claim_next(24).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reset_orphaned_running() {
        let store = store().await;
        let job = store.jobs.create(JobKind::Analyze, None, json!({})).await.unwrap();
        store.jobs.claim_next(24).await.unwrap().unwrap();
        store.jobs.update_progress(&job.id, 40.0, "scenes", "").await.unwrap();

        let reset = store.jobs.reset_orphaned_running().await.unwrap();
        assert_eq!(reset, 1);

        let fetched = store.jobs.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Pending);
        assert_eq!(fetched.progress, 0.0);
        assert!(fetched.started_at.is_none());
    }

    #[tokio::test]
    async fn test_has_active_and_counts() {
        let store = store().await;
        store.jobs.create(JobKind::Analyze, Some("p1"), json!({})).await.unwrap();
        assert!(store.jobs.has_active("p1", JobKind::Analyze).await.unwrap());
        assert!(!store.jobs.has_active("p1", JobKind::Export).await.unwrap());
        assert!(!store.jobs.has_active("p2", JobKind::Analyze).await.unwrap());

        let counts = store.jobs.count_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.running, 0);
    }

    #[tokio::test]
    async fn test_failed_since_and_purge() {
        let store = store().await;
        let job = store.jobs.create(JobKind::Analyze, Some("p1"), json!({})).await.unwrap();
        store.jobs.claim_next(24).await.unwrap();
        store
            .jobs
            .finish(&job.id, JobStatus::Failed, None, Some("tool exploded"))
            .await
            .unwrap();

        let recent = store
            .jobs
            .failed_since(std::time::Duration::from_secs(600), 10)
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].error.as_deref(), Some("tool exploded"));

        // Not yet old enough to purge.
        let purged = store
            .jobs
            .purge_older_than(Utc::now() - ChronoDuration::days(7))
            .await
            .unwrap();
        assert_eq!(purged, 0);

        let purged = store.jobs.purge_older_than(Utc::now()).await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.jobs.try_get(&job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_migrate_legacy_payloads() {
        let store = store().await;
        // A row written by the old shape: arguments in the result column.
        sqlx::query(
            "INSERT INTO jobs (id, kind, status, result, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind("legacy-1")
        .bind("analyze")
        .bind("pending")
        .bind(r#"{"transcribe": true}"#)
        .bind(Utc::now().to_rfc3339())
        .execute(store.pool())
        .await
        .unwrap();

        let migrated = store.jobs.migrate_legacy_payloads().await.unwrap();
        assert_eq!(migrated, 1);

        let job = store.jobs.get("legacy-1").await.unwrap();
        assert_eq!(job.payload, json!({"transcribe": true}));
        assert!(job.result.is_none());

        // Second run is a no-op.
        assert_eq!(store.jobs.migrate_legacy_payloads().await.unwrap(), 0);
    }
}
