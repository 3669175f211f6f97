//! Ingest handler: the download and prepare variants.

use async_trait::async_trait;
use clipforge_engine::sequencer;
use clipforge_engine::{JobContext, JobHandler};
use clipforge_protocol::{
    IngestMode, IngestPayload, OrchestratorError, ProjectStatus, SubjectUpdate,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::fetcher::SourceFetcher;
use crate::transcoder::{AudioOptions, ProxyOptions, Transcoder};

pub struct IngestHandler {
    transcoder: Arc<dyn Transcoder>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl IngestHandler {
    pub fn new(transcoder: Arc<dyn Transcoder>, fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self { transcoder, fetcher }
    }

    async fn run_download(
        &self,
        ctx: &JobContext,
        payload: &IngestPayload,
    ) -> Result<Value, OrchestratorError> {
        let project_id = ctx.project_id()?.to_string();
        let project = ctx.store.projects.get(&project_id).await?;
        let url = payload.source_url.clone().ok_or_else(|| {
            OrchestratorError::Precondition("download ingest requires a source_url".to_string())
        })?;

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Downloading, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Downloading,
            name: Some(project.name.clone()),
        });

        let reporter = ctx.reporter();
        reporter.report(2.0, "download", "Fetching source...");
        let dest_dir = ctx.config.project_dir(&project_id).join("source");
        let fetch_reporter = reporter.clone();
        let path = self
            .fetcher
            .fetch(
                &url,
                &dest_dir,
                &move |p| {
                    fetch_reporter.report(
                        2.0 + p * 0.9,
                        "download",
                        &format!("Downloading: {p:.0}%"),
                    )
                },
                &ctx.cancel,
            )
            .await?;

        ctx.store
            .projects
            .set_source_path(&project_id, &path.to_string_lossy())
            .await?;
        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Created, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Created,
            name: Some(project.name),
        });
        reporter.report(95.0, "download", "Source materialized");

        self.chain(ctx, payload, &project_id).await?;
        reporter.report(100.0, "complete", "Download complete");
        Ok(json!({
            "project_id": project_id,
            "source_path": path.to_string_lossy(),
            "auto_ingest": payload.auto_ingest,
        }))
    }

    async fn run_prepare(
        &self,
        ctx: &JobContext,
        payload: &IngestPayload,
    ) -> Result<Value, OrchestratorError> {
        let project_id = ctx.project_id()?.to_string();
        let project = ctx.store.projects.get(&project_id).await?;
        sequencer::check_prepare_preconditions(&project)?;

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Ingesting, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Ingesting,
            name: Some(project.name.clone()),
        });

        let project_dir = ctx.config.project_dir(&project_id);
        for sub in ["source", "proxy", "analysis", "renders", "exports"] {
            std::fs::create_dir_all(project_dir.join(sub)).map_err(|err| {
                OrchestratorError::HandlerFailure(format!("failed to create project dirs: {err}"))
            })?;
        }

        let reporter = ctx.reporter();
        let source = Path::new(&project.source_path);

        reporter.report(5.0, "probe", "Analyzing source file...");
        ctx.check_cancelled()?;
        let info = match self.transcoder.probe(source).await {
            Ok(info) => info,
            Err(err) => {
                ctx.store
                    .projects
                    .set_status(&project_id, ProjectStatus::Error, Some(&err.to_string()))
                    .await?;
                return Err(err);
            }
        };
        ctx.store
            .projects
            .set_probe_info(
                &project_id,
                info.duration,
                info.width,
                info.height,
                info.fps,
                info.audio_tracks,
            )
            .await?;
        reporter.report(
            10.0,
            "probe",
            &format!("Video: {}x{}, {:.1}s", info.width, info.height, info.duration),
        );

        reporter.report(12.0, "thumbnail", "Extracting thumbnail...");
        let thumbnail = project_dir.join("thumbnail.jpg");
        match self
            .transcoder
            .extract_thumbnail(source, &thumbnail, info.duration * 0.1)
            .await
        {
            Ok(()) => {
                ctx.store
                    .projects
                    .set_thumbnail_path(&project_id, &thumbnail.to_string_lossy())
                    .await?;
            }
            Err(err) => warn!(%err, "thumbnail extraction failed, continuing without thumbnail"),
        }

        if payload.create_proxy {
            ctx.check_cancelled()?;
            reporter.report(15.0, "proxy", "Creating preview proxy...");
            let proxy = project_dir.join("proxy").join("proxy.mp4");
            let proxy_reporter = reporter.clone();
            match self
                .transcoder
                .create_proxy(
                    source,
                    &proxy,
                    &ProxyOptions::default(),
                    info.duration,
                    &move |p| {
                        proxy_reporter.report(
                            15.0 + p * 0.4,
                            "proxy",
                            &format!("Creating proxy: {p:.0}%"),
                        )
                    },
                    &ctx.cancel,
                )
                .await
            {
                Ok(()) => {
                    ctx.store
                        .projects
                        .set_proxy_path(&project_id, &proxy.to_string_lossy())
                        .await?;
                }
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(err) => warn!(%err, "proxy creation failed, continuing without proxy"),
            }
        }

        let mut audio_path = None;
        if payload.extract_audio {
            ctx.check_cancelled()?;
            reporter.report(60.0, "audio", "Extracting audio...");
            let audio = project_dir.join("analysis").join("audio.wav");
            let options = AudioOptions {
                track: payload.audio_track,
                normalize: payload.normalize_audio,
                ..Default::default()
            };
            let audio_reporter = reporter.clone();
            match self
                .transcoder
                .extract_audio(
                    source,
                    &audio,
                    &options,
                    info.duration,
                    &move |p| {
                        audio_reporter.report(
                            60.0 + p * 0.35,
                            "audio",
                            &format!("Extracting audio: {p:.0}%"),
                        )
                    },
                    &ctx.cancel,
                )
                .await
            {
                Ok(()) => {
                    ctx.store
                        .projects
                        .set_audio_path(&project_id, &audio.to_string_lossy())
                        .await?;
                    audio_path = Some(audio.to_string_lossy().into_owned());
                }
                Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                Err(err) => warn!(%err, "audio extraction failed, some features may be limited"),
            }
        }

        ctx.store
            .projects
            .set_status(&project_id, ProjectStatus::Ingested, None)
            .await?;
        ctx.publish_subject(SubjectUpdate {
            project_id: project_id.clone(),
            status: ProjectStatus::Ingested,
            name: Some(project.name),
        });
        reporter.report(100.0, "complete", "Ingestion complete");

        self.chain(ctx, payload, &project_id).await?;

        Ok(json!({
            "project_id": project_id,
            "audio_path": audio_path,
            "video": {
                "width": info.width,
                "height": info.height,
                "duration": info.duration,
                "fps": info.fps,
            },
            "auto_analyze": payload.auto_analyze,
        }))
    }

    /// Evaluate the pipeline edge just before returning success.
    async fn chain(
        &self,
        ctx: &JobContext,
        payload: &IngestPayload,
        project_id: &str,
    ) -> Result<(), OrchestratorError> {
        let refreshed = ctx.store.projects.get(project_id).await?;
        let Some(next) = sequencer::ingest_successor(payload, &refreshed) else {
            return Ok(());
        };
        let kind = next.kind;
        if sequencer::create_successor(&ctx.store, project_id, &ctx.job.id, next)
            .await?
            .is_some()
        {
            info!(project_id, successor = %kind, "auto-chained successor job");
            if let Some(status) = kind.transient_status() {
                ctx.store.projects.set_status(project_id, status, None).await?;
                ctx.publish_subject(SubjectUpdate {
                    project_id: project_id.to_string(),
                    status,
                    name: None,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobHandler for IngestHandler {
    async fn run(&self, ctx: JobContext) -> Result<Value, OrchestratorError> {
        let payload: IngestPayload = ctx.payload()?;
        match payload.mode {
            IngestMode::Download => self.run_download(&ctx, &payload).await,
            IngestMode::Prepare => self.run_prepare(&ctx, &payload).await,
        }
    }
}
