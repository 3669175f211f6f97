//! Project and segment rows.
//!
//! The core treats projects as opaque subjects: it reads domain fields the
//! handlers produced and mutates the lifecycle status only for sequencing
//! and recovery.

use chrono::Utc;
use clipforge_protocol::{Project, ProjectStatus, Segment};
use serde_json::Value;
use sqlx::{FromRow, Pool, Sqlite};
use std::path::Path;
use tracing::info;
use uuid::Uuid;

use crate::StoreError;

#[derive(Clone)]
pub struct ProjectStore {
    pool: Pool<Sqlite>,
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: String,
    name: String,
    source_path: String,
    source_filename: String,
    duration: Option<f64>,
    width: Option<i64>,
    height: Option<i64>,
    fps: Option<f64>,
    audio_tracks: i64,
    proxy_path: Option<String>,
    audio_path: Option<String>,
    thumbnail_path: Option<String>,
    status: String,
    error_message: Option<String>,
    meta: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project, StoreError> {
        let status: ProjectStatus = self.status.parse().map_err(|_| {
            StoreError::Corrupt(format!("project {}: status {}", self.id, self.status))
        })?;
        let meta = self
            .meta
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|_| StoreError::Corrupt(format!("project {}: created_at", self.id)))?
            .with_timezone(&Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|_| StoreError::Corrupt(format!("project {}: updated_at", self.id)))?
            .with_timezone(&Utc);
        Ok(Project {
            id: self.id,
            name: self.name,
            source_path: self.source_path,
            source_filename: self.source_filename,
            duration: self.duration,
            width: self.width,
            height: self.height,
            fps: self.fps,
            audio_tracks: self.audio_tracks,
            proxy_path: self.proxy_path,
            audio_path: self.audio_path,
            thumbnail_path: self.thumbnail_path,
            status,
            error_message: self.error_message,
            meta,
            created_at,
            updated_at,
        })
    }
}

const PROJECT_COLUMNS: &str = "id, name, source_path, source_filename, duration, width, height, \
                               fps, audio_tracks, proxy_path, audio_path, thumbnail_path, status, \
                               error_message, meta, created_at, updated_at";

impl ProjectStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        name: &str,
        source_path: &str,
        meta: Option<Value>,
    ) -> Result<Project, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let filename = Path::new(source_path)
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.to_string());
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, source_path, source_filename, status, meta,
                                  created_at, updated_at)
            VALUES (?, ?, ?, ?, 'created', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(name)
        .bind(source_path)
        .bind(&filename)
        .bind(meta.map(|m| m.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get(&id).await
    }

    pub async fn get(&self, id: &str) -> Result<Project, StoreError> {
        self.try_get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("project {id}")))
    }

    pub async fn try_get(&self, id: &str) -> Result<Option<Project>, StoreError> {
        let row: Option<ProjectRow> =
            sqlx::query_as(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(ProjectRow::into_project).transpose()
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: ProjectStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "UPDATE projects SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if rows == 0 {
            return Err(StoreError::NotFound(format!("project {id}")));
        }
        info!(project_id = %id, status = %status, "project status updated");
        Ok(())
    }

    /// Record what the probe learned about the source file.
    pub async fn set_probe_info(
        &self,
        id: &str,
        duration: f64,
        width: i64,
        height: i64,
        fps: f64,
        audio_tracks: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE projects
            SET duration = ?, width = ?, height = ?, fps = ?, audio_tracks = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(duration)
        .bind(width)
        .bind(height)
        .bind(fps)
        .bind(audio_tracks)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_proxy_path(&self, id: &str, path: &str) -> Result<(), StoreError> {
        self.set_column(id, "proxy_path", path).await
    }

    pub async fn set_audio_path(&self, id: &str, path: &str) -> Result<(), StoreError> {
        self.set_column(id, "audio_path", path).await
    }

    pub async fn set_thumbnail_path(&self, id: &str, path: &str) -> Result<(), StoreError> {
        self.set_column(id, "thumbnail_path", path).await
    }

    pub async fn set_source_path(&self, id: &str, path: &str) -> Result<(), StoreError> {
        self.set_column(id, "source_path", path).await
    }

    async fn set_column(&self, id: &str, column: &str, value: &str) -> Result<(), StoreError> {
        // Column names come from the fixed setters above, never from input.
        sqlx::query(&format!(
            "UPDATE projects SET {column} = ?, updated_at = ? WHERE id = ?"
        ))
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn with_status(&self, status: ProjectStatus) -> Result<Vec<Project>, StoreError> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE status = ? ORDER BY updated_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProjectRow::into_project).collect()
    }

    /// Projects sitting in a transient (-ing) status, for the orphan scan.
    pub async fn transient(&self) -> Result<Vec<Project>, StoreError> {
        let rows: Vec<ProjectRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PROJECT_COLUMNS} FROM projects
            WHERE status IN ('downloading', 'ingesting', 'analyzing', 'exporting')
            ORDER BY updated_at ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ProjectRow::into_project).collect()
    }

    pub async fn insert_segments(
        &self,
        project_id: &str,
        segments: &[Segment],
    ) -> Result<(), StoreError> {
        for segment in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (id, project_id, start_time, end_time, duration,
                                      topic_label, hook_text, transcript, score_total,
                                      score_breakdown, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&segment.id)
            .bind(project_id)
            .bind(segment.start_time)
            .bind(segment.end_time)
            .bind(segment.duration)
            .bind(&segment.topic_label)
            .bind(&segment.hook_text)
            .bind(&segment.transcript)
            .bind(segment.score_total)
            .bind(
                segment
                    .score_breakdown
                    .as_ref()
                    .map(|value| value.to_string()),
            )
            .bind(segment.created_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn segments_for(&self, project_id: &str) -> Result<Vec<Segment>, StoreError> {
        #[derive(FromRow)]
        struct SegmentRow {
            id: String,
            project_id: String,
            start_time: f64,
            end_time: f64,
            duration: f64,
            topic_label: Option<String>,
            hook_text: Option<String>,
            transcript: Option<String>,
            score_total: f64,
            score_breakdown: Option<String>,
            created_at: String,
        }

        let rows: Vec<SegmentRow> = sqlx::query_as(
            r#"
            SELECT id, project_id, start_time, end_time, duration, topic_label, hook_text,
                   transcript, score_total, score_breakdown, created_at
            FROM segments WHERE project_id = ? ORDER BY score_total DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let breakdown = row
                    .score_breakdown
                    .as_deref()
                    .map(serde_json::from_str::<Value>)
                    .transpose()?;
                let created_at = chrono::DateTime::parse_from_rfc3339(&row.created_at)
                    .map_err(|_| {
                        StoreError::Corrupt(format!("segment {}: created_at", row.id))
                    })?
                    .with_timezone(&Utc);
                Ok(Segment {
                    id: row.id,
                    project_id: row.project_id,
                    start_time: row.start_time,
                    end_time: row.end_time,
                    duration: row.duration,
                    topic_label: row.topic_label,
                    hook_text: row.hook_text,
                    transcript: row.transcript,
                    score_total: row.score_total,
                    score_breakdown: breakdown,
                    created_at,
                })
            })
            .collect()
    }

    pub async fn segment_count(&self, project_id: &str) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM segments WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
