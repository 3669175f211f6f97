//! Process-scoped service composition and the inbound control surface.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clipforge_engine::{Dispatcher, ProgressBus};
use clipforge_logging::LogBuffer;
use clipforge_media::handlers;
use clipforge_media::{
    FfmpegTranscoder, HeuristicScorer, SegmentScorer, SourceFetcher, SpeechToText, Transcoder,
    WhisperCli, YtDlpFetcher,
};
use clipforge_protocol::{
    defaults, BusEvent, Job, JobKind, LogEvent, OrchestratorConfig, OrchestratorError,
    ProjectStatus, SubjectUpdate, SupervisorStatus, TickReport,
};
use clipforge_store::Store;
use clipforge_supervisor::{DatabaseProbe, ServiceProbe, Supervisor};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::info;

/// The external tools the pipeline drives. Swappable for tests and for
/// deployments with different tooling.
pub struct Collaborators {
    pub transcoder: Arc<dyn Transcoder>,
    pub stt: Arc<dyn SpeechToText>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub scorer: Arc<dyn SegmentScorer>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            transcoder: Arc::new(FfmpegTranscoder::default()),
            stt: Arc::new(WhisperCli::default()),
            fetcher: Arc::new(YtDlpFetcher::default()),
            scorer: Arc::new(HeuristicScorer::default()),
        }
    }
}

struct TranscoderProbe(Arc<dyn Transcoder>);

#[async_trait]
impl ServiceProbe for TranscoderProbe {
    fn name(&self) -> &str {
        "transcoder"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.availability().await
    }
}

struct SpeechProbe(Arc<dyn SpeechToText>);

#[async_trait]
impl ServiceProbe for SpeechProbe {
    fn name(&self) -> &str {
        "speech_to_text"
    }

    async fn check(&self) -> Result<(), String> {
        self.0.availability().await
    }
}

/// The running orchestrator. The HTTP collaborator binds these methods; the
/// push channel is [`Orchestrator::subscribe`].
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    store: Store,
    bus: Arc<ProgressBus>,
    dispatcher: Arc<Dispatcher>,
    supervisor: Arc<Supervisor>,
    logs: LogBuffer,
}

impl Orchestrator {
    /// Open the store, run startup hygiene, register handlers and spawn the
    /// dispatcher and supervisor.
    pub async fn start(
        config: OrchestratorConfig,
        logs: LogBuffer,
        collaborators: Collaborators,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.data_root).with_context(|| {
            format!("failed to create data root {}", config.data_root.display())
        })?;
        std::fs::create_dir_all(config.projects_dir())
            .context("failed to create projects directory")?;

        let config = Arc::new(config);
        let store = Store::open(&config.data_root.join(defaults::DB_FILE_NAME))
            .await
            .context("failed to open store")?;

        // Startup hygiene, strictly before the workers start serving: move
        // legacy payloads out of the result column, then put crashed Running
        // jobs back in the queue.
        let migrated = store.jobs.migrate_legacy_payloads().await?;
        if migrated > 0 {
            info!(migrated, "migrated legacy job payloads");
        }
        let reset = store.jobs.reset_orphaned_running().await?;
        if reset > 0 {
            info!(reset, "requeued jobs orphaned by a previous run");
        }

        let bus = Arc::new(ProgressBus::new());
        bus.register_foreground(Handle::current());

        let registry = handlers::build_registry(
            Arc::clone(&collaborators.transcoder),
            Arc::clone(&collaborators.stt),
            Arc::clone(&collaborators.fetcher),
            Arc::clone(&collaborators.scorer),
        );
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::clone(&bus),
            registry,
            Arc::clone(&config),
        );
        dispatcher.start();

        let probes: Vec<Arc<dyn ServiceProbe>> = vec![
            Arc::new(TranscoderProbe(Arc::clone(&collaborators.transcoder))),
            Arc::new(SpeechProbe(Arc::clone(&collaborators.stt))),
            Arc::new(DatabaseProbe::new(store.clone())),
        ];
        let supervisor = Supervisor::new(
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&config),
            logs.clone(),
            probes,
        );
        supervisor.start();

        info!(
            data_root = %config.data_root.display(),
            workers = config.worker_count,
            "orchestrator started"
        );
        Ok(Self {
            config,
            store,
            bus,
            dispatcher,
            supervisor,
            logs,
        })
    }

    /// Stop the supervisor, drain the workers, and leave the store clean.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.supervisor.stop();
        self.dispatcher.shutdown().await;
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Direct access to the watcher, e.g. for the runtime toggles
    /// (auto-recovery, retry max, stuck threshold, tick interval).
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Push channel: every JobUpdate, SubjectUpdate, SupervisorStatus and
    /// SupervisorLog event.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Inbound control surface
    // ------------------------------------------------------------------

    pub async fn create_job(
        &self,
        kind: JobKind,
        project_id: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<Job, OrchestratorError> {
        if let Some(project_id) = project_id {
            if self.store.projects.try_get(project_id).await?.is_none() {
                return Err(OrchestratorError::NotFound(format!("project {project_id}")));
            }
            // At most one active job per (subject, kind).
            if self.store.jobs.has_active(project_id, kind).await? {
                return Err(OrchestratorError::Precondition(format!(
                    "an active {kind} job already exists for project {project_id}"
                )));
            }
        }
        Ok(self.store.jobs.create(kind, project_id, payload).await?)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        Ok(self.store.jobs.get(job_id).await?)
    }

    pub async fn list_jobs(
        &self,
        project_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.store.jobs.list(project_id, limit).await?)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, OrchestratorError> {
        if self.store.jobs.try_get(job_id).await?.is_none() {
            return Err(OrchestratorError::NotFound(format!("job {job_id}")));
        }
        Ok(self.dispatcher.cancel_job(job_id).await?)
    }

    pub async fn supervisor_status(&self) -> SupervisorStatus {
        self.supervisor.status().await
    }

    pub async fn supervisor_recover(&self, job_ids: Option<Vec<String>>) -> usize {
        self.supervisor.recover(job_ids).await
    }

    pub async fn supervisor_force_tick(&self) -> TickReport {
        self.supervisor.tick(true).await
    }

    pub fn set_auto_recovery(&self, enabled: bool) {
        self.supervisor.set_auto_recovery(enabled);
    }

    /// Operator override. Transient statuses are owned by the pipeline and
    /// cannot be set by hand.
    pub async fn set_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), OrchestratorError> {
        if status.is_transient() {
            return Err(OrchestratorError::Precondition(format!(
                "cannot set transient status '{status}' by hand"
            )));
        }
        self.store.projects.set_status(project_id, status, None).await?;
        self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
            project_id: project_id.to_string(),
            status,
            name: None,
        }));
        self.logs.record(
            "info",
            "admin",
            format!("project {project_id} status set to '{status}'"),
        );
        Ok(())
    }

    pub async fn cleanup_terminal_jobs(
        &self,
        older_than_days: i64,
    ) -> Result<u64, OrchestratorError> {
        let cutoff = Utc::now() - ChronoDuration::days(older_than_days);
        Ok(self.store.jobs.purge_older_than(cutoff).await?)
    }

    pub fn recent_logs(&self, limit: usize, level: Option<&str>) -> Vec<LogEvent> {
        self.logs.recent(limit, level)
    }
}
