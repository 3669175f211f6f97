//! Per-project, per-stage idempotence.
//!
//! One JSON file per named step under the project's analysis directory.
//! Entries are written atomically (temp file + rename) so a crash mid-write
//! never leaves a half-readable blob, and the cache survives restarts. An
//! `error` key in the blob marks the step as not satisfied.

use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::StoreError;

/// Canonical step names produced by the analyze stage.
pub mod steps {
    pub const TRANSCRIPT: &str = "transcript";
    pub const AUDIO_ANALYSIS: &str = "audio_analysis";
    pub const SCENES: &str = "scenes";
    pub const LAYOUT: &str = "layout";
    pub const TIMELINE: &str = "timeline";
}

pub struct StepCache {
    dir: PathBuf,
}

impl StepCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, step: &str) -> PathBuf {
        self.dir.join(format!("{step}.json"))
    }

    /// Load a satisfied entry. Unreadable files and entries carrying an
    /// `error` field count as misses.
    pub fn load(&self, step: &str) -> Option<Value> {
        let path = self.path_for(step);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) if value.get("error").is_none() => {
                debug!(step, "step cache hit");
                Some(value)
            }
            Ok(_) => None,
            Err(err) => {
                warn!(step, %err, "discarding unreadable step cache entry");
                None
            }
        }
    }

    pub fn contains(&self, step: &str) -> bool {
        self.load(step).is_some()
    }

    /// Persist a step result atomically.
    pub fn store(&self, step: &str, value: &Value) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let final_path = self.path_for(step);
        let tmp_path = self.dir.join(format!(".{step}.json.tmp"));
        fs::write(&tmp_path, serde_json::to_vec_pretty(value)?)?;
        fs::rename(&tmp_path, &final_path)?;
        debug!(step, "step cache entry written");
        Ok(())
    }

    /// Record a failed sub-step so the next run retries it.
    pub fn store_error(&self, step: &str, error: &str) -> Result<(), StoreError> {
        self.store(step, &serde_json::json!({ "error": error }))
    }

    /// Drop every entry for this project. Only an explicit purge removes
    /// cache entries.
    pub fn purge(&self) -> Result<(), StoreError> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}
