// Engine constants (no magic values in services)
use std::time::Duration;

/// Sleep between readiness polls when nothing was due (500ms)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Maximum jobs claimed per readiness poll
pub const DEFAULT_POLL_BATCH_SIZE: i64 = 32;

/// Sleep duration after a store error before polling again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Handler invocations running at once per orchestrator instance
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 8;

/// Largest `timeout_seconds` a job may declare (3 hours)
pub const DEFAULT_MAX_JOB_TIMEOUT_SECS: i64 = 3 * 60 * 60;

/// Fail-safe ceiling around every handler call (4 hours).
/// Must stay above DEFAULT_MAX_JOB_TIMEOUT_SECS.
pub const DEFAULT_EXECUTION_CEILING: Duration = Duration::from_secs(4 * 60 * 60);

/// Time a handler gets to stop after its timeout fires the cancellation token (5s)
pub const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// How many times finalization re-reads the row after losing a version check
pub const FINALIZE_MAX_RETRIES: usize = 5;

/// Consecutive failures that open a job's circuit breaker
pub const DEFAULT_BREAKER_THRESHOLD: i32 = 5;

/// Upper bound for exponential backoff (1 hour)
pub const DEFAULT_MAX_BACKOFF_MS: i64 = 60 * 60 * 1000;

/// Default multiplier for exponential backoff
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Maintenance sweep cadence (60s)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Terminal jobs older than this are deleted (days)
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Database size that triggers VACUUM (MB)
pub const DEFAULT_MAX_DB_SIZE_MB: f64 = 1000.0;

/// Execution records returned by history queries when no limit is given
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// Maximum page size for list queries
pub const MAX_LIST_LIMIT: i64 = 1000;

pub const MS_PER_DAY: i64 = 24 * 60 * 60 * 1000;
