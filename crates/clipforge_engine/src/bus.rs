//! Progress bus: push-based fan-out of job, subject and supervisor events.
//!
//! Two delivery paths. The broadcast channel feeds the push channel and any
//! other global subscriber; sends never block and laggards drop. Callback
//! listeners are routed through the registered foreground runtime so
//! subscribers that expect a single execution context (the HTTP push loop)
//! never see deliveries from worker threads: a publish originating on the
//! foreground context is delivered inline, anything else is enqueued to a
//! single delivery task, which also keeps per-job ordering FIFO.

use clipforge_protocol::BusEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

pub type ListenerFn = Arc<dyn Fn(&BusEvent) + Send + Sync>;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Default)]
struct Listeners {
    global: Vec<ListenerFn>,
    per_job: HashMap<String, Vec<ListenerFn>>,
}

impl Listeners {
    fn deliver(&self, event: &BusEvent) {
        if let Some(job_id) = event.job_id() {
            if let Some(listeners) = self.per_job.get(job_id) {
                for listener in listeners {
                    listener(event);
                }
            }
        }
        for listener in &self.global {
            listener(event);
        }
    }
}

#[derive(Clone)]
struct Foreground {
    handle: Handle,
    queue: mpsc::UnboundedSender<BusEvent>,
}

pub struct ProgressBus {
    broadcast_tx: broadcast::Sender<BusEvent>,
    listeners: Arc<Mutex<Listeners>>,
    foreground: Mutex<Option<Foreground>>,
    degraded_warning: Once,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            broadcast_tx,
            listeners: Arc::new(Mutex::new(Listeners::default())),
            foreground: Mutex::new(None),
            degraded_warning: Once::new(),
        }
    }

    /// Register the execution context callback listeners are delivered on.
    /// Called once at service startup with the server runtime's handle.
    pub fn register_foreground(&self, handle: Handle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<BusEvent>();
        let listeners = Arc::clone(&self.listeners);
        handle.spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Ok(guard) = listeners.lock() {
                    guard.deliver(&event);
                }
            }
        });
        if let Ok(mut guard) = self.foreground.lock() {
            *guard = Some(Foreground { handle, queue: tx });
        }
    }

    /// Receiver for the push channel. Slow consumers lag and drop; they
    /// never block publishers.
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.broadcast_tx.subscribe()
    }

    pub fn add_global_listener(&self, listener: ListenerFn) {
        if let Ok(mut guard) = self.listeners.lock() {
            guard.global.push(listener);
        }
    }

    pub fn add_job_listener(&self, job_id: &str, listener: ListenerFn) {
        if let Ok(mut guard) = self.listeners.lock() {
            guard.per_job.entry(job_id.to_string()).or_default().push(listener);
        }
    }

    /// Drop per-job listeners once the job reaches a terminal state.
    pub fn remove_job_listeners(&self, job_id: &str) {
        if let Ok(mut guard) = self.listeners.lock() {
            guard.per_job.remove(job_id);
        }
    }

    /// Publish to every subscriber. Never blocks the caller.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.broadcast_tx.send(event.clone());

        let foreground = self.foreground.lock().ok().and_then(|guard| guard.clone());
        match foreground {
            Some(foreground) => {
                let on_context = Handle::try_current()
                    .map(|current| current.id() == foreground.handle.id())
                    .unwrap_or(false);
                if on_context {
                    if let Ok(guard) = self.listeners.lock() {
                        guard.deliver(&event);
                    }
                } else if foreground.queue.send(event).is_err() {
                    warn!("foreground delivery task gone; dropping listener delivery");
                }
            }
            None => {
                // No foreground context registered: degrade to best-effort
                // inline delivery.
                self.degraded_warning.call_once(|| {
                    warn!("progress bus has no foreground context; delivering listeners inline");
                });
                if let Ok(guard) = self.listeners.lock() {
                    guard.deliver(&event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipforge_protocol::{SubjectUpdate, ProjectStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn subject_event(id: &str) -> BusEvent {
        BusEvent::SubjectUpdate(SubjectUpdate {
            project_id: id.to_string(),
            status: ProjectStatus::Ingesting,
            name: None,
        })
    }

    fn job_event(id: &str, progress: f64) -> BusEvent {
        BusEvent::JobUpdate(clipforge_protocol::Job {
            id: id.to_string(),
            kind: clipforge_protocol::JobKind::Ingest,
            project_id: None,
            status: clipforge_protocol::JobStatus::Running,
            progress,
            stage: String::new(),
            message: String::new(),
            error: None,
            payload: serde_json::Value::Null,
            result: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    #[tokio::test]
    async fn test_broadcast_subscribers_see_events() {
        let bus = ProgressBus::new();
        let mut rx = bus.subscribe();
        bus.publish(subject_event("p1"));

        match rx.recv().await.unwrap() {
            BusEvent::SubjectUpdate(update) => assert_eq!(update.project_id, "p1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_inline_delivery_without_foreground() {
        let bus = ProgressBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.add_global_listener(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(subject_event("p1"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_job_listener_routing() {
        let bus = ProgressBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.add_job_listener("j1", Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        bus.publish(job_event("j1", 10.0));
        bus.publish(job_event("j2", 10.0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        bus.remove_job_listeners("j1");
        bus.publish(job_event("j1", 20.0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_foreground_delivery_preserves_order() {
        let bus = Arc::new(ProgressBus::new());
        bus.register_foreground(Handle::current());

        let order = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        bus.add_job_listener("j1", Arc::new(move |event| {
            if let BusEvent::JobUpdate(job) = event {
                sink.lock().unwrap().push(job.progress as u64);
            }
        }));

        // Publish from a plain OS thread with no runtime context, as an
        // external tool callback would.
        let publisher = Arc::clone(&bus);
        std::thread::spawn(move || {
            for step in 1..=5 {
                publisher.publish(job_event("j1", step as f64 * 10.0));
            }
        })
        .join()
        .unwrap();

        // Let the delivery task drain.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(*order.lock().unwrap(), vec![10, 20, 30, 40, 50]);
    }
}
