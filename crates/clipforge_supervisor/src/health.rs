//! Service health probes for external collaborators.

use async_trait::async_trait;
use chrono::Utc;
use clipforge_protocol::{HealthState, ServiceHealth};
use clipforge_store::Store;
use std::time::Instant;

/// One external collaborator the supervisor checks per tick (media
/// transcoder, speech-to-text, persistence).
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    fn name(&self) -> &str;
    /// Ok means healthy; the error string becomes the health message.
    async fn check(&self) -> Result<(), String>;
}

/// Run a probe and time it.
pub async fn run_probe(probe: &dyn ServiceProbe) -> ServiceHealth {
    let start = Instant::now();
    let outcome = probe.check().await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
    match outcome {
        Ok(()) => ServiceHealth {
            name: probe.name().to_string(),
            state: HealthState::Healthy,
            latency_ms,
            message: None,
            checked_at: Utc::now(),
        },
        Err(message) => ServiceHealth {
            name: probe.name().to_string(),
            state: HealthState::Unhealthy,
            latency_ms,
            message: Some(truncate(&message, 200)),
            checked_at: Utc::now(),
        },
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    }
}

/// Persistence probe: a trivial query against the store.
pub struct DatabaseProbe {
    store: Store,
}

impl DatabaseProbe {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ServiceProbe for DatabaseProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> Result<(), String> {
        self.store.ping().await.map_err(|err| err.to_string())
    }
}
