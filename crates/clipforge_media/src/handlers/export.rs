//! Export handler: render the selected segments into vertical deliverables.

use async_trait::async_trait;
use clipforge_engine::sequencer;
use clipforge_engine::{JobContext, JobHandler};
use clipforge_protocol::{
    ExportPayload, OrchestratorError, ProjectStatus, Segment, SubjectUpdate,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::transcoder::Transcoder;

pub struct ExportHandler {
    transcoder: Arc<dyn Transcoder>,
}

impl ExportHandler {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl JobHandler for ExportHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value, OrchestratorError> {
        let payload: ExportPayload = ctx.payload()?;
        let project_id = ctx.project_id()?.to_string();
        let project = ctx.store.projects.get(&project_id).await?;

        let cache = ctx.step_cache()?;
        let segment_count = ctx.store.projects.segment_count(&project_id).await?;
        sequencer::check_export_preconditions(segment_count, &cache)?;

        let stored = ctx.store.projects.segments_for(&project_id).await?;
        let selected: Vec<Segment> = if payload.segment_ids.is_empty() {
            stored
        } else {
            let mut picked = Vec::with_capacity(payload.segment_ids.len());
            for id in &payload.segment_ids {
                let segment = stored
                    .iter()
                    .find(|segment| &segment.id == id)
                    .cloned()
                    .ok_or_else(|| OrchestratorError::NotFound(format!("segment {id}")))?;
                picked.push(segment);
            }
            picked
        };

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Exporting, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Exporting,
            name: Some(project.name.clone()),
        });

        let exports_dir = ctx.config.project_dir(&project_id).join("exports");
        std::fs::create_dir_all(&exports_dir).map_err(|err| {
            OrchestratorError::HandlerFailure(format!("failed to create exports dir: {err}"))
        })?;

        let reporter = ctx.reporter();
        let total = selected.len();
        let mut clips = Vec::with_capacity(total);
        for (index, segment) in selected.iter().enumerate() {
            ctx.check_cancelled()?;
            reporter.report(
                5.0 + index as f64 / total as f64 * 90.0,
                "export",
                &format!("Rendering clip {}/{}", index + 1, total),
            );
            let dest = exports_dir.join(format!("clip_{:02}.mp4", index + 1));
            self.transcoder
                .cut_clip(
                    Path::new(&project.source_path),
                    &dest,
                    segment.start_time,
                    segment.end_time,
                    true,
                    &ctx.cancel,
                )
                .await?;
            clips.push(json!({
                "segment_id": segment.id,
                "path": dest.to_string_lossy(),
                "duration": segment.duration,
            }));
        }

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Ready, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Ready,
            name: Some(project.name),
        });
        reporter.report(100.0, "complete", &format!("Exported {} clip(s)", clips.len()));

        Ok(json!({ "project_id": project_id, "clips": clips }))
    }
}
