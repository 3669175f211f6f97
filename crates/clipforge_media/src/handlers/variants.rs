//! Variant rendering: alternate cuts of one segment for A/B posting.

use async_trait::async_trait;
use clipforge_engine::{JobContext, JobHandler};
use clipforge_protocol::{OrchestratorError, ProjectStatus, VariantsPayload};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::transcoder::Transcoder;

/// Start/end nudges applied per variant, in seconds.
const VARIANT_OFFSETS: [f64; 5] = [0.0, -2.0, 2.0, -4.0, 4.0];

pub struct VariantsHandler {
    transcoder: Arc<dyn Transcoder>,
}

impl VariantsHandler {
    pub fn new(transcoder: Arc<dyn Transcoder>) -> Self {
        Self { transcoder }
    }
}

#[async_trait]
impl JobHandler for VariantsHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value, OrchestratorError> {
        let payload: VariantsPayload = ctx.payload()?;
        let project_id = ctx.project_id()?.to_string();
        let project = ctx.store.projects.get(&project_id).await?;
        if !matches!(project.status, ProjectStatus::Analyzed | ProjectStatus::Ready) {
            return Err(OrchestratorError::Precondition(format!(
                "variants require an analyzed project, status is '{}'",
                project.status
            )));
        }

        let stored = ctx.store.projects.segments_for(&project_id).await?;
        let segment = match &payload.segment_id {
            Some(id) => stored
                .iter()
                .find(|segment| &segment.id == id)
                .cloned()
                .ok_or_else(|| OrchestratorError::NotFound(format!("segment {id}")))?,
            // Segments come back ranked; default to the strongest one.
            None => stored.first().cloned().ok_or_else(|| {
                OrchestratorError::Precondition(
                    "project has no candidate segments; analyze it first".to_string(),
                )
            })?,
        };

        let renders_dir = ctx.config.project_dir(&project_id).join("renders");
        std::fs::create_dir_all(&renders_dir).map_err(|err| {
            OrchestratorError::HandlerFailure(format!("failed to create renders dir: {err}"))
        })?;

        let duration = project.duration.unwrap_or(f64::MAX);
        let count = (payload.variants as usize).clamp(1, VARIANT_OFFSETS.len());
        let reporter = ctx.reporter();
        let mut variants = Vec::with_capacity(count);
        for (index, offset) in VARIANT_OFFSETS.iter().take(count).enumerate() {
            ctx.check_cancelled()?;
            reporter.report(
                5.0 + index as f64 / count as f64 * 90.0,
                "variants",
                &format!("Rendering variant {}/{}", index + 1, count),
            );
            let start = (segment.start_time + offset).max(0.0);
            let end = (segment.end_time + offset).min(duration);
            let dest = renders_dir.join(format!("variant_{:02}.mp4", index + 1));
            self.transcoder
                .cut_clip(Path::new(&project.source_path), &dest, start, end, true, &ctx.cancel)
                .await?;
            variants.push(json!({
                "path": dest.to_string_lossy(),
                "start_time": start,
                "end_time": end,
            }));
        }

        reporter.report(100.0, "complete", &format!("Rendered {} variant(s)", variants.len()));
        Ok(json!({
            "project_id": project_id,
            "segment_id": segment.id,
            "variants": variants,
        }))
    }
}
