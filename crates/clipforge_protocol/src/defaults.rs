//! Canonical default values for every orchestrator knob.

/// Supervisor tick interval in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 15;
/// Running with no progress advance for this long counts as stuck.
pub const DEFAULT_STUCK_THRESHOLD_SECS: u64 = 180;
/// Transient project age before the orphan scan considers it abandoned.
pub const DEFAULT_ORPHAN_THRESHOLD_SECS: u64 = 600;
/// Terminal jobs older than this many days are eligible for cleanup.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;
/// Maximum supervisor-driven retries for a failed job.
pub const DEFAULT_RETRY_MAX: u32 = 3;
/// Failed jobs older than this are no longer auto-retried, in seconds.
pub const DEFAULT_RETRY_LOOKBACK_SECS: u64 = 600;
/// Dispatcher worker count. One worker is the tested baseline.
pub const DEFAULT_WORKER_COUNT: usize = 1;
/// Pending jobs older than this window are never claimed, in hours.
pub const DEFAULT_FRESHNESS_WINDOW_HOURS: i64 = 24;
/// Per-handler invocation ceiling, in seconds (media work runs long).
pub const DEFAULT_HANDLER_TIMEOUT_SECS: u64 = 2 * 60 * 60;
/// Grace between cancellation signal and forced subprocess termination.
pub const DEFAULT_CANCEL_GRACE_SECS: u64 = 30;
/// Worker sleep when claim-next comes back empty, in milliseconds.
pub const DEFAULT_IDLE_SLEEP_MS: u64 = 2_000;
/// Failed-job auto-retry runs every Nth supervisor tick.
pub const RETRY_TICK_STRIDE: u64 = 2;
/// Workflow-continuity scan runs every Nth supervisor tick.
pub const CONTINUITY_TICK_STRIDE: u64 = 4;
/// Ring buffer capacity for the supervisor's log tail.
pub const LOG_BUFFER_CAPACITY: usize = 1_000;

/// SQLite file name under the data root.
pub const DB_FILE_NAME: &str = "clipforge.db";

/// Error message prefix written when the supervisor fails a stuck job.
pub const STUCK_ERROR_PREFIX: &str = "auto-recovered: stuck for";
