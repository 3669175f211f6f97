//! In-memory health samples for stall detection.
//!
//! One `(progress, last-advance)` pair per running job, fed from bus
//! traffic rather than the store to avoid write amplification. Lost on
//! restart, which is benign: the startup orphan reset reclassifies every
//! Running job as Pending, and Pending is not subject to stall detection.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct Sample {
    progress: f64,
    last_advance: Instant,
}

#[derive(Default)]
pub struct SampleMap {
    inner: Mutex<HashMap<String, Sample>>,
}

impl SampleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation. The advance clock only moves when progress
    /// does.
    pub fn observe(&self, job_id: &str, progress: f64) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        match inner.get_mut(job_id) {
            Some(sample) => {
                if progress > sample.progress {
                    sample.progress = progress;
                    sample.last_advance = Instant::now();
                }
            }
            None => {
                inner.insert(
                    job_id.to_string(),
                    Sample {
                        progress,
                        last_advance: Instant::now(),
                    },
                );
            }
        }
    }

    /// Jobs whose progress has not advanced for longer than the threshold,
    /// with how long they have been stalled.
    pub fn stalled(&self, threshold: Duration) -> Vec<(String, Duration)> {
        let inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        inner
            .iter()
            .filter_map(|(id, sample)| {
                let stalled_for = sample.last_advance.elapsed();
                (stalled_for > threshold).then(|| (id.clone(), stalled_for))
            })
            .collect()
    }

    pub fn forget(&self, job_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(job_id);
        }
    }

    pub fn tracked(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }
}
