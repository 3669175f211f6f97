//! The supervisor tick loop.

use clipforge_engine::{CancelToken, ProgressBus};
use clipforge_logging::LogBuffer;
use clipforge_protocol::payloads::with_incremented_retry;
use clipforge_protocol::{
    defaults, AnalyzePayload, BusEvent, JobKind, JobStatus, LogEvent, OrchestratorConfig,
    ServiceHealth, SubjectUpdate, SupervisorStatus, TickReport,
};
use clipforge_store::{Store, StoreError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::health::{run_probe, ServiceProbe};
use crate::resources::ResourceProbe;
use crate::samples::SampleMap;

/// Runtime-mutable supervisor switches.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub auto_recovery: bool,
    pub retry_max: u32,
    pub stuck_threshold: Duration,
    pub tick_interval: Duration,
}

impl SupervisorSettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            auto_recovery: true,
            retry_max: config.retry_max,
            stuck_threshold: config.stuck_threshold,
            tick_interval: config.tick_interval,
        }
    }
}

pub struct Supervisor {
    store: Store,
    bus: Arc<ProgressBus>,
    config: Arc<OrchestratorConfig>,
    logs: LogBuffer,
    probes: Vec<Arc<dyn ServiceProbe>>,
    samples: Arc<SampleMap>,
    settings: RwLock<SupervisorSettings>,
    resources: ResourceProbe,
    services_health: Mutex<Vec<ServiceHealth>>,
    started_at: Instant,
    cycle: AtomicU64,
    shutdown: CancelToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        store: Store,
        bus: Arc<ProgressBus>,
        config: Arc<OrchestratorConfig>,
        logs: LogBuffer,
        probes: Vec<Arc<dyn ServiceProbe>>,
    ) -> Arc<Self> {
        let samples = Arc::new(SampleMap::new());
        let settings = SupervisorSettings::from_config(&config);
        let resources = ResourceProbe::new(config.disk_probe_root());

        let supervisor = Arc::new(Self {
            store,
            bus,
            config,
            logs,
            probes,
            samples: Arc::clone(&samples),
            settings: RwLock::new(settings),
            resources,
            services_health: Mutex::new(Vec::new()),
            started_at: Instant::now(),
            cycle: AtomicU64::new(0),
            shutdown: CancelToken::new(),
            task: Mutex::new(None),
        });

        // Stall samples are fed from bus traffic, not store polling.
        let sink = Arc::clone(&samples);
        supervisor
            .bus
            .add_global_listener(Arc::new(move |event: &BusEvent| {
                if let BusEvent::JobUpdate(job) = event {
                    match job.status {
                        JobStatus::Running => sink.observe(&job.id, job.progress),
                        status if status.is_terminal() => sink.forget(&job.id),
                        _ => {}
                    }
                }
            }));

        supervisor
    }

    pub fn samples(&self) -> &SampleMap {
        &self.samples
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| SupervisorSettings::from_config(&self.config))
    }

    pub fn set_auto_recovery(&self, enabled: bool) {
        if let Ok(mut guard) = self.settings.write() {
            guard.auto_recovery = enabled;
        }
        self.announce(
            "info",
            "supervisor",
            format!("auto-recovery {}", if enabled { "enabled" } else { "disabled" }),
        );
    }

    pub fn set_retry_max(&self, retry_max: u32) {
        if let Ok(mut guard) = self.settings.write() {
            guard.retry_max = retry_max;
        }
    }

    pub fn set_stuck_threshold(&self, threshold: Duration) {
        if let Ok(mut guard) = self.settings.write() {
            guard.stuck_threshold = threshold;
        }
    }

    pub fn set_tick_interval(&self, interval: Duration) {
        if let Ok(mut guard) = self.settings.write() {
            guard.tick_interval = interval;
        }
    }

    /// Spawn the recurring loop on the current runtime.
    pub fn start(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("supervisor started");
            while !supervisor.shutdown.is_cancelled() {
                supervisor.tick(false).await;
                tokio::time::sleep(supervisor.settings().tick_interval).await;
            }
            info!("supervisor stopped");
        });
        if let Ok(mut guard) = self.task.lock() {
            *guard = Some(handle);
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Ok(mut guard) = self.task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }

    /// One supervisor pass. `force` runs the strided actions (retry,
    /// continuity) regardless of the cycle counter. Failures inside a tick
    /// are logged and never abort the loop.
    pub async fn tick(&self, force: bool) -> TickReport {
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        let settings = self.settings();
        let mut report = TickReport::default();

        let mut services = Vec::with_capacity(self.probes.len());
        for probe in &self.probes {
            services.push(run_probe(probe.as_ref()).await);
        }
        report.services_checked = services.len();
        if let Ok(mut guard) = self.services_health.lock() {
            *guard = services;
        }

        if settings.auto_recovery {
            report.stuck_recovered = self.recover_stalled(settings.stuck_threshold).await;
            report.orphans_recovered = self.recover_orphans().await;
            if force || cycle % defaults::RETRY_TICK_STRIDE == 0 {
                report.retries_started = self.retry_failed(settings.retry_max).await;
            }
            if force || cycle % defaults::CONTINUITY_TICK_STRIDE == 0 {
                report.continuity_actions = self.ensure_continuity(settings.retry_max).await;
            }
        }

        let status = self.build_status(&settings).await;
        self.bus.publish(BusEvent::SupervisorStatus(status));

        report
    }

    /// Aggregate snapshot for the control surface, without broadcasting.
    pub async fn status(&self) -> SupervisorStatus {
        let settings = self.settings();
        self.build_status(&settings).await
    }

    /// On-demand stuck recovery. With ids, each named Running job is failed
    /// as stuck; without, the normal threshold scan runs.
    pub async fn recover(&self, job_ids: Option<Vec<String>>) -> usize {
        match job_ids {
            Some(ids) => {
                let mut recovered = 0;
                for id in ids {
                    let stalled_for = Duration::ZERO;
                    match self.recover_stuck_job(&id, stalled_for).await {
                        Ok(true) => recovered += 1,
                        Ok(false) => {}
                        Err(err) => error!(job_id = %id, %err, "manual recovery failed"),
                    }
                }
                recovered
            }
            None => {
                let threshold = self.settings().stuck_threshold;
                self.recover_stalled(threshold).await
            }
        }
    }

    async fn recover_stalled(&self, threshold: Duration) -> usize {
        let stalled = self.samples.stalled(threshold);
        if stalled.is_empty() {
            return 0;
        }
        warn!(count = stalled.len(), "found stuck jobs, attempting recovery");
        let mut recovered = 0;
        for (job_id, stalled_for) in stalled {
            match self.recover_stuck_job(&job_id, stalled_for).await {
                Ok(true) => recovered += 1,
                Ok(false) => {}
                Err(err) => error!(job_id = %job_id, %err, "stuck recovery failed"),
            }
        }
        recovered
    }

    async fn recover_stuck_job(
        &self,
        job_id: &str,
        stalled_for: Duration,
    ) -> Result<bool, StoreError> {
        let Some(job) = self.store.jobs.try_get(job_id).await? else {
            self.samples.forget(job_id);
            return Ok(false);
        };
        if job.status != JobStatus::Running {
            self.samples.forget(job_id);
            return Ok(false);
        }

        let error = format!("{} {}s", defaults::STUCK_ERROR_PREFIX, stalled_for.as_secs());
        self.store
            .jobs
            .finish(job_id, JobStatus::Failed, None, Some(&error))
            .await?;
        self.samples.forget(job_id);

        if let Some(project_id) = job.project_id.as_deref() {
            if let Some(project) = self.store.projects.try_get(project_id).await? {
                let back = job.kind.rollback_status();
                self.store.projects.set_status(project_id, back, None).await?;
                self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
                    project_id: project_id.to_string(),
                    status: back,
                    name: Some(project.name),
                }));
            }
        }

        if let Ok(Some(snapshot)) = self.store.jobs.try_get(job_id).await {
            self.bus.publish(BusEvent::JobUpdate(snapshot));
        }
        self.announce(
            "warn",
            "recovery",
            format!("recovered stuck {} job {job_id} after {}s", job.kind, stalled_for.as_secs()),
        );
        Ok(true)
    }

    async fn recover_orphans(&self) -> usize {
        let projects = match self.store.projects.transient().await {
            Ok(projects) => projects,
            Err(err) => {
                error!(%err, "orphan scan failed to list transient projects");
                return 0;
            }
        };

        let mut recovered = 0;
        for project in projects {
            let covered = match project.status.covering_kind() {
                Some(kind) => match self.store.jobs.has_active(&project.id, kind).await {
                    Ok(covered) => covered,
                    Err(err) => {
                        error!(project_id = %project.id, %err, "orphan scan failed");
                        continue;
                    }
                },
                None => true,
            };
            if covered {
                continue;
            }

            let back = project.status.rollback_status();
            if let Err(err) = self.store.projects.set_status(&project.id, back, None).await {
                error!(project_id = %project.id, %err, "orphan rollback failed");
                continue;
            }
            self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
                project_id: project.id.clone(),
                status: back,
                name: Some(project.name.clone()),
            }));
            self.announce(
                "warn",
                "recovery",
                format!(
                    "recovered orphaned project {}: '{}' -> '{}'",
                    project.id, project.status, back
                ),
            );
            recovered += 1;
        }
        recovered
    }

    async fn retry_failed(&self, retry_max: u32) -> usize {
        let failed = match self
            .store
            .jobs
            .failed_since(self.config.retry_lookback, 10)
            .await
        {
            Ok(failed) => failed,
            Err(err) => {
                error!(%err, "retry scan failed");
                return 0;
            }
        };

        let mut restarted = 0;
        for job in failed {
            let retry_count = job.retry_count();
            if retry_count >= retry_max {
                continue;
            }
            // Store inconsistencies need operator attention, not a rerun.
            if job
                .error
                .as_deref()
                .map(|error| error.starts_with("store inconsistency"))
                .unwrap_or(false)
            {
                continue;
            }
            let Some(project_id) = job.project_id.as_deref() else {
                continue;
            };
            let outcome: Result<bool, StoreError> = async {
                if self.store.projects.try_get(project_id).await?.is_none() {
                    return Ok(false);
                }
                if self.store.jobs.has_active(project_id, job.kind).await? {
                    // Already has a replacement job.
                    return Ok(false);
                }
                let payload = with_incremented_retry(&job.payload);
                self.store
                    .jobs
                    .create(job.kind, Some(project_id), payload)
                    .await?;
                if let Some(status) = job.kind.transient_status() {
                    self.store.projects.set_status(project_id, status, None).await?;
                    self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
                        project_id: project_id.to_string(),
                        status,
                        name: None,
                    }));
                }
                Ok(true)
            }
            .await;

            match outcome {
                Ok(true) => {
                    restarted += 1;
                    self.announce(
                        "info",
                        "recovery",
                        format!(
                            "auto-restarted {} job for project {} (retry #{})",
                            job.kind,
                            project_id,
                            retry_count + 1
                        ),
                    );
                }
                Ok(false) => {}
                Err(err) => error!(job_id = %job.id, %err, "failed to restart job"),
            }
        }
        restarted
    }

    async fn ensure_continuity(&self, retry_max: u32) -> usize {
        let ingested = match self
            .store
            .projects
            .with_status(clipforge_protocol::ProjectStatus::Ingested)
            .await
        {
            Ok(projects) => projects,
            Err(err) => {
                error!(%err, "continuity scan failed");
                return 0;
            }
        };

        let mut actions = 0;
        for project in ingested {
            if !project.auto_analyze() {
                continue;
            }
            let outcome: Result<bool, StoreError> = async {
                if self.store.jobs.has_active(&project.id, JobKind::Analyze).await? {
                    return Ok(false);
                }
                // Retries exhausted means operator action, not re-ignition.
                if let Some(last) = self.store.jobs.latest(&project.id, JobKind::Analyze).await? {
                    if last.status == JobStatus::Failed && last.retry_count() >= retry_max {
                        return Ok(false);
                    }
                }
                let payload = serde_json::to_value(AnalyzePayload::default())
                    .unwrap_or(serde_json::Value::Null);
                self.store
                    .jobs
                    .create(JobKind::Analyze, Some(&project.id), payload)
                    .await?;
                self.store
                    .projects
                    .set_status(&project.id, clipforge_protocol::ProjectStatus::Analyzing, None)
                    .await?;
                self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
                    project_id: project.id.clone(),
                    status: clipforge_protocol::ProjectStatus::Analyzing,
                    name: Some(project.name.clone()),
                }));
                Ok(true)
            }
            .await;

            match outcome {
                Ok(true) => {
                    actions += 1;
                    self.announce(
                        "info",
                        "recovery",
                        format!("auto-started analysis for project {}", project.id),
                    );
                }
                Ok(false) => {}
                Err(err) => {
                    error!(project_id = %project.id, %err, "failed to auto-start analysis")
                }
            }
        }
        actions
    }

    async fn build_status(&self, settings: &SupervisorSettings) -> SupervisorStatus {
        let jobs = self
            .store
            .jobs
            .count_by_status()
            .await
            .unwrap_or_default();
        let services = self
            .services_health
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();
        SupervisorStatus {
            uptime_seconds: self.started_at.elapsed().as_secs(),
            cycle: self.cycle.load(Ordering::SeqCst),
            auto_recovery: settings.auto_recovery,
            resources: self.resources.snapshot(),
            services,
            jobs,
            stuck_jobs: self.samples.stalled(settings.stuck_threshold).len(),
            logs: self.logs.summary(),
        }
    }

    /// Record a recovery action in the log tail and push it to subscribers.
    fn announce(&self, level: &str, source: &str, message: String) {
        match level {
            "warn" => warn!(source, "{message}"),
            "error" => error!(source, "{message}"),
            _ => info!(source, "{message}"),
        }
        self.logs.record(level, source, message.clone());
        self.bus.publish(BusEvent::SupervisorLog(LogEvent {
            timestamp: chrono::Utc::now(),
            level: level.to_ascii_uppercase(),
            source: source.to_string(),
            message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_protocol::{ProjectStatus, RETRY_COUNT_FIELD};
    use serde_json::json;

    async fn setup() -> (Store, Arc<Supervisor>) {
        let store = Store::open_in_memory().await.unwrap();
        let bus = Arc::new(ProgressBus::new());
        let config = Arc::new(OrchestratorConfig::new(std::env::temp_dir()));
        let logs = LogBuffer::with_capacity(100);
        let supervisor = Supervisor::new(store.clone(), bus, config, logs, Vec::new());
        (store, supervisor)
    }

    async fn running_job(store: &Store, project_id: &str, kind: JobKind) -> clipforge_protocol::Job {
        let job = store
            .jobs
            .create(kind, Some(project_id), json!({}))
            .await
            .unwrap();
        let claimed = store.jobs.claim_next(24).await.unwrap().unwrap();
        assert_eq!(claimed.id, job.id);
        claimed
    }

    #[tokio::test]
    async fn test_stuck_job_failed_and_project_rolled_back() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Analyzing, None)
            .await
            .unwrap();
        let job = running_job(&store, &project.id, JobKind::Analyze).await;

        supervisor.samples().observe(&job.id, 40.0);
        supervisor.set_stuck_threshold(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = supervisor.tick(false).await;
        assert_eq!(report.stuck_recovered, 1);

        let failed = store.jobs.get(&job.id).await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("stuck"));
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Ingested
        );
        assert_eq!(supervisor.samples().tracked(), 0);
    }

    #[tokio::test]
    async fn test_advancing_job_is_left_alone() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        let job = running_job(&store, &project.id, JobKind::Analyze).await;

        supervisor.samples().observe(&job.id, 10.0);
        supervisor.samples().observe(&job.id, 20.0);

        let report = supervisor.tick(false).await;
        assert_eq!(report.stuck_recovered, 0);
        assert_eq!(
            store.jobs.get(&job.id).await.unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_orphaned_project_rolled_back() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Analyzing, None)
            .await
            .unwrap();

        let report = supervisor.tick(false).await;
        assert_eq!(report.orphans_recovered, 1);
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Ingested
        );
    }

    #[tokio::test]
    async fn test_transient_project_with_live_job_is_not_orphaned() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Analyzing, None)
            .await
            .unwrap();
        store
            .jobs
            .create(JobKind::Analyze, Some(&project.id), json!({}))
            .await
            .unwrap();

        let report = supervisor.tick(false).await;
        assert_eq!(report.orphans_recovered, 0);
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Analyzing
        );
    }

    #[tokio::test]
    async fn test_convergence_of_stuck_and_orphans_in_one_tick() {
        let (store, supervisor) = setup().await;
        let stuck_project = store.projects.create("a", "/a.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&stuck_project.id, ProjectStatus::Ingesting, None)
            .await
            .unwrap();
        let job = running_job(&store, &stuck_project.id, JobKind::Ingest).await;
        supervisor.samples().observe(&job.id, 5.0);

        let orphan = store.projects.create("b", "/b.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&orphan.id, ProjectStatus::Exporting, None)
            .await
            .unwrap();

        supervisor.set_stuck_threshold(Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let report = supervisor.tick(false).await;
        assert_eq!(report.stuck_recovered, 1);
        assert_eq!(report.orphans_recovered, 1);

        // Converged: a second pass has nothing to do.
        let again = supervisor.tick(false).await;
        assert_eq!(again.stuck_recovered, 0);
        assert_eq!(again.orphans_recovered, 0);
    }

    #[tokio::test]
    async fn test_failed_job_retried_with_incremented_count() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Ingested, None)
            .await
            .unwrap();
        let job = running_job(&store, &project.id, JobKind::Analyze).await;
        store
            .jobs
            .finish(&job.id, JobStatus::Failed, None, Some("whisper crashed"))
            .await
            .unwrap();

        let report = supervisor.tick(true).await;
        assert_eq!(report.retries_started, 1);

        let jobs = store.jobs.list(Some(&project.id), 10).await.unwrap();
        let replacement = jobs
            .iter()
            .find(|j| j.status == JobStatus::Pending)
            .expect("replacement job");
        assert_eq!(replacement.retry_count(), 1);
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Analyzing
        );

        // With the replacement live, the next pass does not duplicate it.
        let again = supervisor.tick(true).await;
        assert_eq!(again.retries_started, 0);
    }

    #[tokio::test]
    async fn test_retry_cap_is_respected() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        let job = running_job(&store, &project.id, JobKind::Analyze).await;
        // Exhausted: payload already carries the max retry count.
        sqlx::query("UPDATE jobs SET payload = ? WHERE id = ?")
            .bind(json!({ RETRY_COUNT_FIELD: 3 }).to_string())
            .bind(&job.id)
            .execute(store.pool())
            .await
            .unwrap();
        store
            .jobs
            .finish(&job.id, JobStatus::Failed, None, Some("still broken"))
            .await
            .unwrap();

        let report = supervisor.tick(true).await;
        assert_eq!(report.retries_started, 0);
        let jobs = store.jobs.list(Some(&project.id), 10).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn test_continuity_starts_analysis_for_ingested_project() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Ingested, None)
            .await
            .unwrap();

        let report = supervisor.tick(true).await;
        assert_eq!(report.continuity_actions, 1);
        assert!(store.jobs.has_active(&project.id, JobKind::Analyze).await.unwrap());
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Analyzing
        );
    }

    #[tokio::test]
    async fn test_continuity_leaves_exhausted_projects_alone() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Ingested, None)
            .await
            .unwrap();

        // The last analysis attempt burned through every retry.
        let job = running_job(&store, &project.id, JobKind::Analyze).await;
        sqlx::query("UPDATE jobs SET payload = ? WHERE id = ?")
            .bind(json!({ RETRY_COUNT_FIELD: 3 }).to_string())
            .bind(&job.id)
            .execute(store.pool())
            .await
            .unwrap();
        store
            .jobs
            .finish(&job.id, JobStatus::Failed, None, Some("whisper keeps crashing"))
            .await
            .unwrap();

        let report = supervisor.tick(true).await;
        assert_eq!(report.continuity_actions, 0);
        assert_eq!(report.retries_started, 0);
        assert!(!store.jobs.has_active(&project.id, JobKind::Analyze).await.unwrap());
        // The last failure stays observable for the operator.
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Ingested
        );
    }

    #[tokio::test]
    async fn test_continuity_respects_auto_analyze_opt_out() {
        let (store, supervisor) = setup().await;
        let project = store
            .projects
            .create("vod", "/vod.mp4", Some(json!({"auto_analyze": false})))
            .await
            .unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Ingested, None)
            .await
            .unwrap();

        let report = supervisor.tick(true).await;
        assert_eq!(report.continuity_actions, 0);
        assert!(!store.jobs.has_active(&project.id, JobKind::Analyze).await.unwrap());
    }

    #[tokio::test]
    async fn test_auto_recovery_toggle_disables_actions() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        store
            .projects
            .set_status(&project.id, ProjectStatus::Analyzing, None)
            .await
            .unwrap();

        supervisor.set_auto_recovery(false);
        let report = supervisor.tick(true).await;
        assert_eq!(report.orphans_recovered, 0);
        assert_eq!(
            store.projects.get(&project.id).await.unwrap().status,
            ProjectStatus::Analyzing
        );
    }

    #[tokio::test]
    async fn test_status_snapshot_counts() {
        let (store, supervisor) = setup().await;
        store.jobs.create(JobKind::Ingest, None, json!({})).await.unwrap();
        let status = supervisor.status().await;
        assert_eq!(status.jobs.pending, 1);
        assert!(status.auto_recovery);
    }

    #[tokio::test]
    async fn test_manual_recover_by_id() {
        let (store, supervisor) = setup().await;
        let project = store.projects.create("vod", "/vod.mp4", None).await.unwrap();
        let job = running_job(&store, &project.id, JobKind::Export).await;

        let recovered = supervisor.recover(Some(vec![job.id.clone()])).await;
        assert_eq!(recovered, 1);
        assert_eq!(
            store.jobs.get(&job.id).await.unwrap().status,
            JobStatus::Failed
        );
    }
}
