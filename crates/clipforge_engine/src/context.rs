//! What a handler receives when it runs: the job snapshot, its decoded
//! payload, a progress-reporter capability and the cancellation token.

use clipforge_protocol::{BusEvent, Job, OrchestratorConfig, OrchestratorError, SubjectUpdate};
use clipforge_store::{StepCache, Store};
use serde::de::DeserializeOwned;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tracing::warn;

use crate::bus::ProgressBus;
use crate::cancel::CancelToken;

#[derive(Clone)]
pub struct JobContext {
    pub job: Job,
    pub store: Store,
    pub bus: Arc<ProgressBus>,
    pub config: Arc<OrchestratorConfig>,
    pub cancel: CancelToken,
    runtime: Handle,
}

impl JobContext {
    pub fn new(
        job: Job,
        store: Store,
        bus: Arc<ProgressBus>,
        config: Arc<OrchestratorConfig>,
        cancel: CancelToken,
        runtime: Handle,
    ) -> Self {
        Self {
            job,
            store,
            bus,
            config,
            cancel,
            runtime,
        }
    }

    /// Decode the payload into the per-kind record. Unknown fields survive
    /// inside the record's `extra` map.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, OrchestratorError> {
        let raw = if self.job.payload.is_null() {
            serde_json::json!({})
        } else {
            self.job.payload.clone()
        };
        serde_json::from_value(raw).map_err(|err| {
            OrchestratorError::HandlerFailure(format!(
                "invalid payload for {} job {}: {err}",
                self.job.kind, self.job.id
            ))
        })
    }

    /// Subject id, required by every pipeline handler.
    pub fn project_id(&self) -> Result<&str, OrchestratorError> {
        self.job
            .project_id
            .as_deref()
            .ok_or_else(|| OrchestratorError::Precondition("job has no project".to_string()))
    }

    /// Bail out with `Cancelled` if the token has fired. Handlers call this
    /// between expensive steps.
    pub fn check_cancelled(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Step cache for this job's project.
    pub fn step_cache(&self) -> Result<StepCache, OrchestratorError> {
        let project_id = self.project_id()?;
        Ok(StepCache::new(self.config.analysis_dir(project_id)))
    }

    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter {
            store: self.store.clone(),
            bus: Arc::clone(&self.bus),
            runtime: self.runtime.clone(),
            snapshot: Arc::new(Mutex::new(self.job.clone())),
        }
    }

    /// Announce a project lifecycle change on the bus.
    pub fn publish_subject(&self, update: SubjectUpdate) {
        self.bus.publish(BusEvent::SubjectUpdate(update));
    }
}

/// Cheap, thread-safe progress capability handed to handlers.
///
/// Reporting updates an in-memory snapshot, publishes the snapshot on the
/// bus, and schedules the durable write on the engine runtime without
/// waiting for it.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Store,
    bus: Arc<ProgressBus>,
    runtime: Handle,
    snapshot: Arc<Mutex<Job>>,
}

impl ProgressReporter {
    pub fn report(&self, progress: f64, stage: &str, message: &str) {
        let progress = progress.clamp(0.0, 100.0);
        let job = {
            let mut snapshot = match self.snapshot.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            // Progress is monotonic while running; late lower values keep
            // the stage/message but not the regression.
            if progress > snapshot.progress {
                snapshot.progress = progress;
            }
            snapshot.stage = stage.to_string();
            snapshot.message = message.to_string();
            snapshot.clone()
        };

        let store = self.store.clone();
        let job_id = job.id.clone();
        let stage_owned = stage.to_string();
        let message_owned = message.to_string();
        self.runtime.spawn(async move {
            if let Err(err) = store
                .jobs
                .update_progress(&job_id, progress, &stage_owned, &message_owned)
                .await
            {
                warn!(job_id = %job_id, %err, "failed to persist progress update");
            }
        });

        self.bus.publish(BusEvent::JobUpdate(job));
    }
}
