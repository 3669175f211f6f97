//! End-to-end scenarios: a real dispatcher and supervisor over in-process
//! fake media collaborators.

use async_trait::async_trait;
use clipforge::{Collaborators, Orchestrator};
use clipforge_engine::CancelToken;
use clipforge_logging::LogBuffer;
use clipforge_media::transcoder::{
    AudioOptions, MediaInfo, ProgressFn, ProxyOptions, QuietSpan, SceneCut,
};
use clipforge_media::{HeuristicScorer, SourceFetcher, SpeechToText, Transcoder};
use clipforge_protocol::{
    BusEvent, JobKind, JobStatus, OrchestratorConfig, OrchestratorError, ProjectStatus,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct FakeTranscoder {
    hang_in_proxy: bool,
    proxies_started: AtomicUsize,
}

impl FakeTranscoder {
    fn quick() -> Arc<Self> {
        Arc::new(Self {
            hang_in_proxy: false,
            proxies_started: AtomicUsize::new(0),
        })
    }

    fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang_in_proxy: true,
            proxies_started: AtomicUsize::new(0),
        })
    }
}

fn place_file(dest: &Path) -> Result<(), OrchestratorError> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))?;
    }
    std::fs::write(dest, b"media").map_err(|err| OrchestratorError::HandlerFailure(err.to_string()))
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn availability(&self) -> Result<(), String> {
        Ok(())
    }

    async fn probe(&self, _source: &Path) -> Result<MediaInfo, OrchestratorError> {
        Ok(MediaInfo {
            duration: 600.0,
            width: 1920,
            height: 1080,
            fps: 60.0,
            audio_tracks: 1,
        })
    }

    async fn create_proxy(
        &self,
        _source: &Path,
        dest: &Path,
        _options: &ProxyOptions,
        _duration: f64,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        self.proxies_started.fetch_add(1, Ordering::SeqCst);
        if self.hang_in_proxy {
            // A transcode that never finishes on its own; it only honours
            // its cancellation token.
            loop {
                if cancel.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        progress(100.0);
        place_file(dest)
    }

    async fn extract_audio(
        &self,
        _source: &Path,
        dest: &Path,
        _options: &AudioOptions,
        _duration: f64,
        progress: ProgressFn<'_>,
        _cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        progress(100.0);
        place_file(dest)
    }

    async fn extract_thumbnail(
        &self,
        _source: &Path,
        dest: &Path,
        _at_seconds: f64,
    ) -> Result<(), OrchestratorError> {
        place_file(dest)
    }

    async fn detect_scenes(
        &self,
        _source: &Path,
        _cancel: &CancelToken,
    ) -> Result<Vec<SceneCut>, OrchestratorError> {
        Ok(vec![SceneCut {
            time: 30.0,
            confidence: 0.7,
        }])
    }

    async fn detect_silence(
        &self,
        _audio: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<QuietSpan>, OrchestratorError> {
        if self.hang_in_proxy {
            loop {
                if cancel.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        Ok(Vec::new())
    }

    async fn cut_clip(
        &self,
        _source: &Path,
        dest: &Path,
        _start: f64,
        _end: f64,
        _vertical: bool,
        _cancel: &CancelToken,
    ) -> Result<(), OrchestratorError> {
        place_file(dest)
    }
}

struct FakeSpeech;

#[async_trait]
impl SpeechToText for FakeSpeech {
    async fn availability(&self) -> Result<(), String> {
        Ok(())
    }

    async fn transcribe(
        &self,
        _audio: &Path,
        _language: Option<&str>,
        progress: ProgressFn<'_>,
        _cancel: &CancelToken,
    ) -> Result<Value, OrchestratorError> {
        progress(100.0);
        let segments: Vec<Value> = (0..60)
            .map(|i| {
                json!({
                    "start": i as f64 * 5.0,
                    "end": i as f64 * 5.0 + 5.0,
                    "text": "here's why this run went sideways"
                })
            })
            .collect();
        Ok(json!({"text": "transcript", "language": "en", "segments": segments}))
    }
}

struct FakeFetcher;

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _url: &str,
        dest_dir: &Path,
        progress: ProgressFn<'_>,
        _cancel: &CancelToken,
    ) -> Result<PathBuf, OrchestratorError> {
        let path = dest_dir.join("source.mp4");
        place_file(&path)?;
        progress(100.0);
        Ok(path)
    }
}

fn collaborators(transcoder: Arc<FakeTranscoder>) -> Collaborators {
    Collaborators {
        transcoder,
        stt: Arc::new(FakeSpeech),
        fetcher: Arc::new(FakeFetcher),
        scorer: Arc::new(HeuristicScorer::default()),
    }
}

async fn start_orchestrator(
    dir: &tempfile::TempDir,
    transcoder: Arc<FakeTranscoder>,
) -> Orchestrator {
    let mut config = OrchestratorConfig::new(dir.path());
    config.idle_sleep = Duration::from_millis(30);
    config.cancel_grace = Duration::from_millis(500);
    Orchestrator::start(
        config,
        LogBuffer::with_capacity(200),
        collaborators(transcoder),
    )
    .await
    .unwrap()
}

async fn seeded_project(orchestrator: &Orchestrator, dir: &tempfile::TempDir) -> String {
    let source = dir.path().join("vod.mp4");
    std::fs::write(&source, b"video").unwrap();
    orchestrator
        .store()
        .projects
        .create("stream", &source.to_string_lossy(), None)
        .await
        .unwrap()
        .id
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_happy_pipeline_ingest_chains_analyze() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = start_orchestrator(&dir, FakeTranscoder::quick()).await;
    let project_id = seeded_project(&orchestrator, &dir).await;
    let mut events = orchestrator.subscribe();

    let job = orchestrator
        .create_job(
            JobKind::Ingest,
            Some(&project_id),
            json!({"auto_analyze": true}),
        )
        .await
        .unwrap();

    let orch = &orchestrator;
    let pid = &project_id;
    wait_until("project to reach analyzed", move || async move {
        orch.store().projects.get(pid).await.unwrap().status == ProjectStatus::Analyzed
    })
    .await;

    // The ingest job completed with full progress.
    let ingest = orchestrator.get_job(&job.id).await.unwrap();
    assert_eq!(ingest.status, JobStatus::Completed);
    assert_eq!(ingest.progress, 100.0);

    // Exactly one Analyze successor, and no live Ingest remains.
    let jobs = orchestrator.list_jobs(Some(&project_id), 50).await.unwrap();
    let analyze_jobs: Vec<_> = jobs.iter().filter(|j| j.kind == JobKind::Analyze).collect();
    assert_eq!(analyze_jobs.len(), 1);
    assert!(!jobs
        .iter()
        .any(|j| j.kind == JobKind::Ingest && j.status.is_active()));

    wait_until("analyze job to complete", move || async move {
        orch.list_jobs(Some(pid), 50)
            .await
            .unwrap()
            .iter()
            .any(|j| j.kind == JobKind::Analyze && j.status == JobStatus::Completed)
    })
    .await;

    // Analysis produced scored candidate segments.
    assert!(
        orchestrator
            .store()
            .projects
            .segment_count(&project_id)
            .await
            .unwrap()
            > 0
    );

    // The push channel saw the lifecycle: ingesting and analyzed subject
    // updates plus terminal job updates.
    let mut saw_ingesting = false;
    let mut saw_analyzed = false;
    let mut saw_terminal_job = false;
    while let Ok(event) = events.try_recv() {
        match event {
            BusEvent::SubjectUpdate(update) => {
                saw_ingesting |= update.status == ProjectStatus::Ingesting;
                saw_analyzed |= update.status == ProjectStatus::Analyzed;
            }
            BusEvent::JobUpdate(job) => saw_terminal_job |= job.status.is_terminal(),
            _ => {}
        }
    }
    assert!(saw_ingesting && saw_analyzed && saw_terminal_job);

    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_during_transcode_stops_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let transcoder = FakeTranscoder::hanging();
    let orchestrator = start_orchestrator(&dir, Arc::clone(&transcoder)).await;
    let project_id = seeded_project(&orchestrator, &dir).await;

    let job = orchestrator
        .create_job(JobKind::Ingest, Some(&project_id), json!({}))
        .await
        .unwrap();

    // Wait until the handler is demonstrably mid-transcode.
    let probe = &transcoder;
    wait_until("proxy transcode to start", move || async move {
        probe.proxies_started.load(Ordering::SeqCst) > 0
    })
    .await;

    assert!(orchestrator.cancel_job(&job.id).await.unwrap());
    let orch = &orchestrator;
    let job_id = &job.id;
    wait_until("job to reach cancelled", move || async move {
        orch.get_job(job_id).await.unwrap().status == JobStatus::Cancelled
    })
    .await;

    // No successor was chained.
    let jobs = orchestrator.list_jobs(Some(&project_id), 50).await.unwrap();
    assert!(!jobs.iter().any(|j| j.kind == JobKind::Analyze));

    // The project was abandoned mid-Ingesting; the next supervisor pass
    // rolls it back.
    orchestrator.supervisor_force_tick().await;
    assert_eq!(
        orchestrator
            .store()
            .projects
            .get(&project_id)
            .await
            .unwrap()
            .status,
        ProjectStatus::Created
    );

    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_active_job_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let transcoder = FakeTranscoder::hanging();
    let orchestrator = start_orchestrator(&dir, transcoder).await;
    let project_id = seeded_project(&orchestrator, &dir).await;

    orchestrator
        .create_job(JobKind::Ingest, Some(&project_id), json!({}))
        .await
        .unwrap();
    let err = orchestrator
        .create_job(JobKind::Ingest, Some(&project_id), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Precondition(_)));

    let err = orchestrator
        .create_job(JobKind::Ingest, Some("no-such-project"), json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orphan_recovery_and_workflow_continuity() {
    let dir = tempfile::tempdir().unwrap();
    // Hanging transcoder keeps the continuity-created Analyze job from
    // racing ahead; this test only watches the supervisor.
    let orchestrator = start_orchestrator(&dir, FakeTranscoder::hanging()).await;
    let project_id = seeded_project(&orchestrator, &dir).await;
    let store = orchestrator.store();
    let audio = dir.path().join("audio.wav");
    std::fs::write(&audio, b"riff").unwrap();
    store
        .projects
        .set_audio_path(&project_id, &audio.to_string_lossy())
        .await
        .unwrap();

    // A transient project with no covering job.
    store
        .projects
        .set_status(&project_id, ProjectStatus::Analyzing, None)
        .await
        .unwrap();

    let report = orchestrator.supervisor_force_tick().await;
    assert_eq!(report.orphans_recovered, 1);

    // The forced tick also ran the continuity scan: the project wants
    // auto-analysis, so an Analyze job exists and the project is covered
    // again.
    assert!(store
        .jobs
        .has_active(&project_id, JobKind::Analyze)
        .await
        .unwrap());
    assert_eq!(
        store.projects.get(&project_id).await.unwrap().status,
        ProjectStatus::Analyzing
    );

    orchestrator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_operator_overrides_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = start_orchestrator(&dir, FakeTranscoder::quick()).await;
    let project_id = seeded_project(&orchestrator, &dir).await;

    // Transient statuses are pipeline-owned.
    let err = orchestrator
        .set_project_status(&project_id, ProjectStatus::Ingesting)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Precondition(_)));

    orchestrator
        .set_project_status(&project_id, ProjectStatus::Ready)
        .await
        .unwrap();
    assert_eq!(
        orchestrator
            .store()
            .projects
            .get(&project_id)
            .await
            .unwrap()
            .status,
        ProjectStatus::Ready
    );

    // Cleanup removes terminal jobs past retention. The Scrape kind has no
    // registered handler, so the dispatcher fails the job on claim.
    let job = orchestrator
        .store()
        .jobs
        .create(JobKind::Scrape, None, json!({}))
        .await
        .unwrap();
    let orch = &orchestrator;
    let job_id = &job.id;
    wait_until("scrape job to fail", move || async move {
        orch.get_job(job_id).await.unwrap().status == JobStatus::Failed
    })
    .await;
    let deleted = orchestrator.cleanup_terminal_jobs(0).await.unwrap();
    assert_eq!(deleted, 1);

    let status = orchestrator.supervisor_status().await;
    assert!(status.auto_recovery);

    orchestrator.shutdown().await;
}
