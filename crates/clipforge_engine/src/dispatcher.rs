//! Queue dispatcher: worker agents running the claim / execute / finish loop.

use clipforge_protocol::{
    BusEvent, Job, JobStatus, OrchestratorConfig, OrchestratorError, SubjectUpdate,
};
use clipforge_store::{Store, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::ProgressBus;
use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::registry::HandlerRegistry;

/// Sleep after a claim error before retrying, so a sick database does not
/// spin the loop.
const CLAIM_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct Dispatcher {
    store: Store,
    bus: Arc<ProgressBus>,
    registry: HandlerRegistry,
    config: Arc<OrchestratorConfig>,
    shutdown: CancelToken,
    active: Mutex<HashMap<String, CancelToken>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        bus: Arc<ProgressBus>,
        registry: HandlerRegistry,
        config: Arc<OrchestratorConfig>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            bus,
            registry,
            config,
            shutdown: CancelToken::new(),
            active: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the worker agents on the current runtime.
    pub fn start(self: &Arc<Self>) {
        let mut workers = match self.workers.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        for worker_id in 0..self.config.worker_count {
            let dispatcher = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id).await;
            }));
        }
        info!(workers = self.config.worker_count, "dispatcher started");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        info!(worker_id, "worker started");
        while !self.shutdown.is_cancelled() {
            match self
                .store
                .jobs
                .claim_next(self.config.freshness_window_hours)
                .await
            {
                Ok(Some(job)) => self.execute(job).await,
                Ok(None) => tokio::time::sleep(self.config.idle_sleep).await,
                Err(err) => {
                    error!(worker_id, %err, "claim-next failed");
                    tokio::time::sleep(CLAIM_ERROR_BACKOFF).await;
                }
            }
        }
        info!(worker_id, "worker stopped");
    }

    async fn execute(&self, job: Job) {
        let token = CancelToken::new();
        if let Ok(mut active) = self.active.lock() {
            active.insert(job.id.clone(), token.clone());
        }
        self.publish_snapshot(&job.id).await;

        match self.registry.resolve(job.kind) {
            None => {
                let message = format!("no handler registered for job kind '{}'", job.kind);
                warn!(job_id = %job.id, "{message}");
                self.finish(&job.id, JobStatus::Failed, None, Some(&message)).await;
            }
            Some(handler) => {
                let ctx = JobContext::new(
                    job.clone(),
                    self.store.clone(),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.config),
                    token.clone(),
                    Handle::current(),
                );

                let run = handler.run(ctx);
                tokio::pin!(run);

                let outcome = tokio::select! {
                    result = &mut run => Some(result),
                    _ = tokio::time::sleep(self.config.handler_timeout) => None,
                };

                match outcome {
                    Some(Ok(result)) => {
                        if token.is_cancelled() {
                            // Result of a cancelled handler is discarded.
                            self.finish(&job.id, JobStatus::Cancelled, None, None).await;
                        } else {
                            self.finish(&job.id, JobStatus::Completed, Some(result), None).await;
                        }
                    }
                    Some(Err(OrchestratorError::Cancelled)) => {
                        self.finish(&job.id, JobStatus::Cancelled, None, None).await;
                    }
                    Some(Err(err)) => {
                        error!(job_id = %job.id, kind = %job.kind, %err, "handler failed");
                        self.finish(&job.id, JobStatus::Failed, None, Some(&err.to_string()))
                            .await;
                        // A failed guard leaves the project untouched; a
                        // failed tool rolls it back one stage.
                        if !matches!(err, OrchestratorError::Precondition(_)) {
                            self.rollback_subject(&job).await;
                        }
                    }
                    None => {
                        // Timed out: signal cancellation and give the handler
                        // one grace interval to unwind before it is dropped
                        // (owned subprocesses die with it).
                        warn!(job_id = %job.id, "handler exceeded timeout, cancelling");
                        token.cancel();
                        let _ = tokio::time::timeout(self.config.cancel_grace, &mut run).await;
                        let message = format!(
                            "handler timed out after {}s",
                            self.config.handler_timeout.as_secs()
                        );
                        self.finish(&job.id, JobStatus::Failed, None, Some(&message)).await;
                        self.rollback_subject(&job).await;
                    }
                }
            }
        }

        if let Ok(mut active) = self.active.lock() {
            active.remove(&job.id);
        }
        self.publish_snapshot(&job.id).await;
        self.bus.remove_job_listeners(&job.id);
    }

    /// Terminal write. A handler error never poisons the worker loop, so
    /// store failures here are logged rather than propagated.
    async fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<&str>,
    ) {
        if let Err(err) = self.store.jobs.finish(job_id, status, result, error).await {
            error!(job_id, %err, "failed to record job outcome");
        }
    }

    /// Roll a project still parked in this job's transient status back one
    /// stage. Any other status is left for the supervisor to judge.
    async fn rollback_subject(&self, job: &Job) {
        let Some(project_id) = job.project_id.as_deref() else {
            return;
        };
        let project = match self.store.projects.try_get(project_id).await {
            Ok(Some(project)) => project,
            Ok(None) => return,
            Err(err) => {
                warn!(project_id, %err, "failed to load project for rollback");
                return;
            }
        };
        if !project.status.is_transient() || project.status.covering_kind() != Some(job.kind) {
            return;
        }
        let back = project.status.rollback_status();
        match self.store.projects.set_status(project_id, back, None).await {
            Ok(()) => self.bus.publish(BusEvent::SubjectUpdate(SubjectUpdate {
                project_id: project_id.to_string(),
                status: back,
                name: Some(project.name),
            })),
            Err(err) => warn!(project_id, %err, "project rollback failed"),
        }
    }

    async fn publish_snapshot(&self, job_id: &str) {
        match self.store.jobs.try_get(job_id).await {
            Ok(Some(job)) => self.bus.publish(BusEvent::JobUpdate(job)),
            Ok(None) => {}
            Err(err) => warn!(job_id, %err, "failed to load job snapshot for broadcast"),
        }
    }

    /// Cancel a job: mark it Cancelled in the store and signal the token of
    /// the running handler, if any. Returns whether a transition happened.
    pub async fn cancel_job(&self, job_id: &str) -> Result<bool, StoreError> {
        let transitioned = self.store.jobs.cancel(job_id).await?;
        if let Ok(active) = self.active.lock() {
            if let Some(token) = active.get(job_id) {
                token.cancel();
            }
        }
        if transitioned {
            self.publish_snapshot(job_id).await;
        }
        Ok(transitioned)
    }

    /// Ids of jobs currently executing in this process.
    pub fn active_jobs(&self) -> Vec<String> {
        self.active
            .lock()
            .map(|active| active.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Stop claiming, signal every running handler, and wait (bounded) for
    /// the workers to drain.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(active) = self.active.lock() {
            for token in active.values() {
                token.cancel();
            }
        }

        let workers: Vec<JoinHandle<()>> = match self.workers.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            if tokio::time::timeout(self.config.cancel_grace, worker)
                .await
                .is_err()
            {
                warn!("worker did not drain within the cancel grace; dropping it");
            }
        }
        info!("dispatcher stopped");
    }
}
