//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::defaults;

/// Canonical configuration shared by the launcher, dispatcher and supervisor.
///
/// Every knob has an environment override (`CLIPFORGE_*`); unparsable values
/// fall back to the default rather than aborting startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root directory for the SQLite store and per-project artifacts.
    pub data_root: PathBuf,
    pub worker_count: usize,
    pub tick_interval: Duration,
    pub stuck_threshold: Duration,
    pub orphan_threshold: Duration,
    pub retention_days: i64,
    pub retry_max: u32,
    pub retry_lookback: Duration,
    pub freshness_window_hours: i64,
    pub handler_timeout: Duration,
    pub cancel_grace: Duration,
    pub idle_sleep: Duration,
}

impl OrchestratorConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            worker_count: defaults::DEFAULT_WORKER_COUNT,
            tick_interval: Duration::from_secs(defaults::DEFAULT_TICK_INTERVAL_SECS),
            stuck_threshold: Duration::from_secs(defaults::DEFAULT_STUCK_THRESHOLD_SECS),
            orphan_threshold: Duration::from_secs(defaults::DEFAULT_ORPHAN_THRESHOLD_SECS),
            retention_days: defaults::DEFAULT_RETENTION_DAYS,
            retry_max: defaults::DEFAULT_RETRY_MAX,
            retry_lookback: Duration::from_secs(defaults::DEFAULT_RETRY_LOOKBACK_SECS),
            freshness_window_hours: defaults::DEFAULT_FRESHNESS_WINDOW_HOURS,
            handler_timeout: Duration::from_secs(defaults::DEFAULT_HANDLER_TIMEOUT_SECS),
            cancel_grace: Duration::from_secs(defaults::DEFAULT_CANCEL_GRACE_SECS),
            idle_sleep: Duration::from_millis(defaults::DEFAULT_IDLE_SLEEP_MS),
        }
    }

    /// Build a config from the environment, rooted at `data_root`.
    pub fn from_env(data_root: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(data_root);
        config.worker_count =
            env_parse("CLIPFORGE_WORKERS", config.worker_count).max(1);
        config.tick_interval = Duration::from_secs(env_parse(
            "CLIPFORGE_TICK_INTERVAL_SECS",
            config.tick_interval.as_secs(),
        ));
        config.stuck_threshold = Duration::from_secs(env_parse(
            "CLIPFORGE_STUCK_THRESHOLD_SECS",
            config.stuck_threshold.as_secs(),
        ));
        config.orphan_threshold = Duration::from_secs(env_parse(
            "CLIPFORGE_ORPHAN_THRESHOLD_SECS",
            config.orphan_threshold.as_secs(),
        ));
        config.retention_days = env_parse("CLIPFORGE_RETENTION_DAYS", config.retention_days);
        config.retry_max = env_parse("CLIPFORGE_RETRY_MAX", config.retry_max);
        config.freshness_window_hours = env_parse(
            "CLIPFORGE_FRESHNESS_WINDOW_HOURS",
            config.freshness_window_hours,
        );
        config.handler_timeout = Duration::from_secs(env_parse(
            "CLIPFORGE_HANDLER_TIMEOUT_SECS",
            config.handler_timeout.as_secs(),
        ));
        config.cancel_grace = Duration::from_secs(env_parse(
            "CLIPFORGE_CANCEL_GRACE_SECS",
            config.cancel_grace.as_secs(),
        ));
        config
    }

    /// SQLite URL for the job/project store.
    pub fn db_url(&self) -> String {
        format!("sqlite:{}", self.data_root.join(defaults::DB_FILE_NAME).display())
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.data_root.join("projects")
    }

    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(project_id)
    }

    /// Step cache directory for a project.
    pub fn analysis_dir(&self, project_id: &str) -> PathBuf {
        self.project_dir(project_id).join("analysis")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    /// Disk-usage root reported by the resource probe.
    pub fn disk_probe_root(&self) -> &Path {
        &self.data_root
    }
}

fn env_parse<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
