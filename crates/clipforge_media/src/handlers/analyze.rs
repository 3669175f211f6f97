//! Analyze handler: transcript, audio scan, scene detection, layout and
//! segment scoring, each step resumable through the step cache.

use async_trait::async_trait;
use clipforge_engine::sequencer;
use clipforge_engine::{JobContext, JobHandler};
use clipforge_protocol::{
    AnalyzePayload, OrchestratorError, ProjectStatus, Segment, SubjectUpdate,
};
use clipforge_store::{steps, StepCache};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;

use crate::scoring::{transcript_segments, SegmentScorer};
use crate::speech::SpeechToText;
use crate::transcoder::{QuietSpan, SceneCut, Transcoder};

pub struct AnalyzeHandler {
    transcoder: Arc<dyn Transcoder>,
    stt: Arc<dyn SpeechToText>,
    scorer: Arc<dyn SegmentScorer>,
}

impl AnalyzeHandler {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        stt: Arc<dyn SpeechToText>,
        scorer: Arc<dyn SegmentScorer>,
    ) -> Self {
        Self {
            transcoder,
            stt,
            scorer,
        }
    }

    /// Run one cached step: emit the cached blob on a hit, otherwise compute,
    /// persist, and on failure record the error so the next run retries it.
    async fn cached_step<F>(
        &self,
        ctx: &JobContext,
        cache: &StepCache,
        step: &str,
        boundary: f64,
        compute: F,
    ) -> Result<Value, OrchestratorError>
    where
        F: std::future::Future<Output = Result<Value, OrchestratorError>>,
    {
        if let Some(cached) = cache.load(step) {
            ctx.reporter()
                .report(boundary, step, &format!("{step} already cached"));
            return Ok(cached);
        }
        ctx.check_cancelled()?;
        match compute.await {
            Ok(value) => {
                cache.store(step, &value)?;
                ctx.reporter().report(boundary, step, &format!("{step} complete"));
                Ok(value)
            }
            Err(OrchestratorError::Cancelled) => Err(OrchestratorError::Cancelled),
            Err(err) => {
                let _ = cache.store_error(step, &err.to_string());
                Err(err)
            }
        }
    }
}

#[async_trait]
impl JobHandler for AnalyzeHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value, OrchestratorError> {
        let payload: AnalyzePayload = ctx.payload()?;
        let project_id = ctx.project_id()?.to_string();
        let project = ctx.store.projects.get(&project_id).await?;
        sequencer::check_analyze_preconditions(&project)?;
        let audio_path = project.audio_path.clone().ok_or_else(|| {
            OrchestratorError::Precondition("project has no extracted audio".to_string())
        })?;

        if project.status != ProjectStatus::Analyzing {
            ctx.store
                .projects
                .set_status(&project_id, ProjectStatus::Analyzing, None)
                .await?;
        }
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Analyzing,
            name: Some(project.name.clone()),
        });

        let cache = ctx.step_cache()?;
        let reporter = ctx.reporter();

        let transcript = if payload.transcribe {
            let stt = Arc::clone(&self.stt);
            let audio = audio_path.clone();
            let language = payload.language.clone();
            let stt_reporter = reporter.clone();
            let cancel = ctx.cancel.clone();
            let value = self
                .cached_step(&ctx, &cache, steps::TRANSCRIPT, 35.0, async move {
                    stt_reporter.report(5.0, "transcription", "Transcribing audio...");
                    let progress_reporter = stt_reporter.clone();
                    stt.transcribe(
                        Path::new(&audio),
                        language.as_deref(),
                        &move |p| {
                            progress_reporter.report(
                                5.0 + p * 0.3,
                                "transcription",
                                &format!("Transcribing: {p:.0}%"),
                            )
                        },
                        &cancel,
                    )
                    .await
                })
                .await?;
            Some(value)
        } else {
            None
        };

        let audio_analysis = if payload.analyze_audio {
            let transcoder = Arc::clone(&self.transcoder);
            let audio = audio_path.clone();
            let scan_reporter = reporter.clone();
            let cancel = ctx.cancel.clone();
            let value = self
                .cached_step(&ctx, &cache, steps::AUDIO_ANALYSIS, 50.0, async move {
                    scan_reporter.report(40.0, "audio_analysis", "Scanning for dead air...");
                    let spans = transcoder.detect_silence(Path::new(&audio), &cancel).await?;
                    Ok(json!({ "quiet_spans": spans }))
                })
                .await?;
            Some(value)
        } else {
            None
        };

        let scene_data = if payload.detect_scenes {
            let transcoder = Arc::clone(&self.transcoder);
            // Prefer the proxy: scene detection does not need full quality.
            let video = project
                .proxy_path
                .clone()
                .unwrap_or_else(|| project.source_path.clone());
            let scan_reporter = reporter.clone();
            let cancel = ctx.cancel.clone();
            let value = self
                .cached_step(&ctx, &cache, steps::SCENES, 65.0, async move {
                    scan_reporter.report(55.0, "scene_detection", "Detecting scenes...");
                    let scenes = transcoder.detect_scenes(Path::new(&video), &cancel).await?;
                    Ok(json!({ "scenes": scenes }))
                })
                .await?;
            Some(value)
        } else {
            None
        };

        let layout = if payload.detect_layout {
            let width = project.width.unwrap_or(0);
            let height = project.height.unwrap_or(0);
            let value = self
                .cached_step(&ctx, &cache, steps::LAYOUT, 80.0, async move {
                    let layout_type = if height > width { "vertical" } else { "landscape" };
                    Ok(json!({ "layout_type": layout_type }))
                })
                .await?;
            Some(value)
        } else {
            None
        };

        let mut segments: Vec<Segment> = Vec::new();
        if payload.score_segments {
            if let Some(transcript_value) = &transcript {
                ctx.check_cancelled()?;
                reporter.report(85.0, "scoring", "Scoring candidate segments...");
                let spoken = transcript_segments(transcript_value);
                let quiet: Vec<QuietSpan> = audio_analysis
                    .as_ref()
                    .and_then(|value| value.get("quiet_spans").cloned())
                    .and_then(|value| serde_json::from_value(value).ok())
                    .unwrap_or_default();
                let scenes: Vec<SceneCut> = scene_data
                    .as_ref()
                    .and_then(|value| value.get("scenes").cloned())
                    .and_then(|value| serde_json::from_value(value).ok())
                    .unwrap_or_default();
                segments = self.scorer.build_segments(
                    &project_id,
                    &spoken,
                    project.duration.unwrap_or(0.0),
                    &quiet,
                    &scenes,
                );
                ctx.store.projects.insert_segments(&project_id, &segments).await?;
            }
        }

        let timeline = json!({
            "project_id": project_id,
            "duration": project.duration.unwrap_or(0.0),
            "layout": layout,
            "segments": segments.iter().map(|segment| json!({
                "id": segment.id,
                "start_time": segment.start_time,
                "end_time": segment.end_time,
                "score": segment.score_total,
            })).collect::<Vec<_>>(),
            "scene_changes": scene_data
                .as_ref()
                .and_then(|value| value.get("scenes").cloned())
                .unwrap_or_else(|| json!([])),
        });
        cache.store(steps::TIMELINE, &timeline)?;

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Analyzed, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Analyzed,
            name: Some(project.name),
        });
        reporter.report(
            100.0,
            "complete",
            &format!("Analysis complete - {} segments found", segments.len()),
        );

        Ok(json!({
            "project_id": project_id,
            "segments_count": segments.len(),
            "transcript_available": transcript.is_some(),
        }))
    }
}
