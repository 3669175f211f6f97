//! Bounded in-memory log tail.

use chrono::Utc;
use clipforge_protocol::{LogEvent, LogSummary};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Shared ring buffer of recent log events.
///
/// Cheap to clone; all clones share the same storage. The supervisor reads
/// this for its status snapshot and the control surface serves it as the
/// log tail.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<LogEvent>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, event: LogEvent) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        if guard.len() == self.capacity {
            guard.pop_front();
        }
        guard.push_back(event);
    }

    /// Record an event authored by the orchestrator itself (recovery
    /// announcements and operator actions).
    pub fn record(&self, level: &str, source: &str, message: impl Into<String>) {
        self.push(LogEvent {
            timestamp: Utc::now(),
            level: level.to_ascii_uppercase(),
            source: source.to_string(),
            message: message.into(),
        });
    }

    /// Most recent events first, optionally filtered by level.
    pub fn recent(&self, limit: usize, level: Option<&str>) -> Vec<LogEvent> {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        guard
            .iter()
            .rev()
            .filter(|entry| {
                level
                    .map(|wanted| entry.level.eq_ignore_ascii_case(wanted))
                    .unwrap_or(true)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> LogSummary {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return LogSummary::default(),
        };
        let mut summary = LogSummary {
            total: guard.len(),
            ..Default::default()
        };
        for entry in guard.iter() {
            match entry.level.as_str() {
                "ERROR" => summary.errors += 1,
                "WARN" | "WARNING" => summary.warnings += 1,
                _ => {}
            }
        }
        summary
    }
}

/// Tracing layer that mirrors events into a [`LogBuffer`].
pub struct CaptureLayer {
    buffer: LogBuffer,
}

impl CaptureLayer {
    pub fn new(buffer: LogBuffer) -> Self {
        Self { buffer }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(LogEvent {
            timestamp: Utc::now(),
            level: level_name(metadata.level()).to_string(),
            source: metadata.target().to_string(),
            message: visitor.message,
        });
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}
