// Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::job_type::JobType;
use crate::domain::parameters::JobParameters;
use crate::domain::schedule::Schedule;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job ID (UUID v4)
pub type JobId = String;

/// Priority (higher number = dispatched first among ready jobs)
pub type Priority = i32;

pub const MIN_PRIORITY: Priority = 0;
pub const MAX_PRIORITY: Priority = 100;
pub const DEFAULT_PRIORITY: Priority = 50;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: i64 = 1800;
pub const DEFAULT_BACKOFF_DELAY_MS: i64 = 60_000;

/// Job Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Created,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub const TERMINAL: [JobStatus; 3] =
        [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// The lifecycle graph. Every status change goes through this check.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Created, Scheduled)
                | (Scheduled, Running)
                | (Running, Completed)
                | (Running, Scheduled)
                | (Running, Failed)
                | (Created, Cancelled)
                | (Scheduled, Cancelled)
                | (Running, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Scheduled => "SCHEDULED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        JobStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::ValidationError(format!("unknown job status '{}'", s)))
    }
}

/// Job Entity
///
/// Breaker counters and in-flight bookkeeping live on the row itself so any
/// orchestrator instance can pick up where another one crashed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    // Identity
    pub id: JobId,
    pub name: String,
    pub group: String,
    pub job_type: JobType,

    pub status: JobStatus,
    pub priority: Priority,

    pub parameters: JobParameters,
    pub schedule: Schedule,

    // Retry
    pub attempts: i32,
    pub max_attempts: i32,
    pub backoff_delay_ms: i64,

    // Execution
    pub timeout_seconds: i64,
    pub active_executions: i32,
    pub cancel_requested: bool,
    pub last_error: Option<String>,

    // Circuit breaker
    pub consecutive_failures: i32,
    pub circuit_breaker_open: bool,
    pub breaker_opened_at: Option<i64>,

    // Timestamps (epoch ms)
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub next_execution_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,

    /// Optimistic-concurrency token, bumped by the store on every write
    pub version: i64,
}

impl Job {
    /// Create a new job in CREATED state
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `parameters` - Parameters already parsed for `job_type`
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        name: impl Into<String>,
        group: impl Into<String>,
        job_type: JobType,
        parameters: JobParameters,
        schedule: Schedule,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            group: group.into(),
            job_type,
            status: JobStatus::Created,
            priority: DEFAULT_PRIORITY,
            parameters,
            schedule,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_delay_ms: DEFAULT_BACKOFF_DELAY_MS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            active_executions: 0,
            cancel_requested: false,
            last_error: None,
            consecutive_failures: 0,
            circuit_breaker_open: false,
            breaker_opened_at: None,
            started_at: None,
            completed_at: None,
            next_execution_at: None,
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    /// Create a test job with deterministic ID (test-1, test-2, ...) and timestamp.
    ///
    /// **Note**: only for tests. Production code injects ID and time via providers.
    pub fn new_test(job_type: JobType, parameters: JobParameters, schedule: Schedule) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let id = format!("test-{}", counter);

        Self::new(
            id.clone(),
            1_000,
            id,
            "test",
            job_type,
            parameters,
            schedule,
        )
    }

    pub fn is_recurring(&self) -> bool {
        self.schedule.is_recurring()
    }

    /// SCHEDULED, due and breaker closed
    pub fn is_ready(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Scheduled
            && !self.circuit_breaker_open
            && self.next_execution_at.is_some_and(|at| at <= now_millis)
    }

    /// Absolute deadline of the in-flight attempt
    pub fn deadline_at(&self) -> Option<i64> {
        self.started_at.map(|s| s + self.timeout_seconds * 1000)
    }

    pub fn is_timed_out(&self, now_millis: i64) -> bool {
        self.status == JobStatus::Running && self.deadline_at().is_some_and(|d| d < now_millis)
    }

    /// CREATED -> SCHEDULED
    pub fn schedule(&mut self, next_execution_at: i64, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Scheduled, now_millis)?;
        self.next_execution_at = Some(next_execution_at);
        Ok(())
    }

    /// SCHEDULED -> RUNNING, claiming the single execution slot
    pub fn begin_attempt(&mut self, now_millis: i64) -> Result<()> {
        if self.circuit_breaker_open {
            return Err(DomainError::CircuitBreakerOpen(self.id.clone()));
        }
        if self.status != JobStatus::Scheduled {
            return Err(DomainError::JobNotExecutable {
                id: self.id.clone(),
                status: self.status.to_string(),
            });
        }
        if self.active_executions != 0 {
            return Err(DomainError::ValidationError(format!(
                "job {} already has {} active execution(s)",
                self.id, self.active_executions
            )));
        }
        if self.attempts >= self.max_attempts {
            return Err(DomainError::AttemptsExhausted {
                id: self.id.clone(),
                max_attempts: self.max_attempts,
            });
        }
        self.transition(JobStatus::Running, now_millis)?;
        self.started_at = Some(now_millis);
        self.completed_at = None;
        self.attempts += 1;
        self.active_executions = 1;
        self.cancel_requested = false;
        Ok(())
    }

    /// RUNNING -> COMPLETED
    pub fn complete(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Completed, now_millis)?;
        self.release_execution();
        self.completed_at = Some(now_millis);
        self.next_execution_at = None;
        self.consecutive_failures = 0;
        self.last_error = None;
        Ok(())
    }

    /// RUNNING -> SCHEDULED (retry after failure, or next occurrence of a recurring job)
    pub fn reschedule(&mut self, next_execution_at: i64, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Scheduled, now_millis)?;
        self.release_execution();
        self.next_execution_at = Some(next_execution_at);
        Ok(())
    }

    /// RUNNING -> FAILED (terminal)
    pub fn fail(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Failed, now_millis)?;
        self.release_execution();
        self.completed_at = Some(now_millis);
        self.next_execution_at = None;
        Ok(())
    }

    /// SCHEDULED -> RUNNING -> FAILED without starting an attempt, for a job
    /// whose attempt budget is already spent. No execution record belongs to it.
    pub fn fail_exhausted(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Scheduled || self.attempts < self.max_attempts {
            return Err(DomainError::ValidationError(format!(
                "job {} still has attempts left",
                self.id
            )));
        }
        self.transition(JobStatus::Running, now_millis)?;
        self.transition(JobStatus::Failed, now_millis)?;
        self.completed_at = Some(now_millis);
        self.next_execution_at = None;
        self.last_error = Some(format!(
            "attempts exhausted ({} of {})",
            self.attempts, self.max_attempts
        ));
        Ok(())
    }

    /// Administrative cancel of a job that is not running
    pub fn cancel(&mut self, now_millis: i64) -> Result<()> {
        if self.status == JobStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "CANCELLED (running jobs only accept a cancel request)".to_string(),
            });
        }
        self.transition(JobStatus::Cancelled, now_millis)?;
        self.completed_at = Some(now_millis);
        self.next_execution_at = None;
        Ok(())
    }

    /// Mark cancel intent on a RUNNING job; applied when the attempt finishes
    pub fn request_cancel(&mut self, now_millis: i64) -> Result<()> {
        if self.status != JobStatus::Running {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: "CANCEL_REQUESTED".to_string(),
            });
        }
        self.cancel_requested = true;
        self.updated_at = now_millis;
        Ok(())
    }

    /// RUNNING (cancel requested) -> CANCELLED once the attempt is over
    pub fn finish_cancelled(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Cancelled, now_millis)?;
        self.release_execution();
        self.completed_at = Some(now_millis);
        self.next_execution_at = None;
        Ok(())
    }

    /// Close the breaker and clear the failure streak
    pub fn reset_circuit_breaker(&mut self, now_millis: i64) {
        self.circuit_breaker_open = false;
        self.breaker_opened_at = None;
        self.consecutive_failures = 0;
        self.updated_at = now_millis;
    }

    fn release_execution(&mut self) {
        self.active_executions = (self.active_executions - 1).max(0);
    }

    fn transition(&mut self, next: JobStatus, now_millis: i64) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now_millis;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn etl_job() -> Job {
        let params = JobParameters::parse(
            JobType::EtlDatabasePull,
            json!({"source": "db", "destination": "lake"}),
        )
        .unwrap();
        Job::new_test(JobType::EtlDatabasePull, params, Schedule::once(5_000))
    }

    #[test]
    fn test_transition_graph() {
        use JobStatus::*;
        let allowed = [
            (Created, Scheduled),
            (Scheduled, Running),
            (Running, Completed),
            (Running, Scheduled),
            (Running, Failed),
            (Created, Cancelled),
            (Scheduled, Cancelled),
            (Running, Cancelled),
        ];
        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_statuses_have_no_exit() {
        for status in JobStatus::TERMINAL {
            assert!(JobStatus::ALL.iter().all(|next| !status.can_transition_to(*next)));
        }
    }

    #[test]
    fn test_happy_path() {
        let mut job = etl_job();
        job.schedule(5_000, 2_000).unwrap();
        assert!(!job.is_ready(4_999));
        assert!(job.is_ready(5_000));

        job.begin_attempt(5_000).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.active_executions, 1);
        assert_eq!(job.deadline_at(), Some(5_000 + DEFAULT_TIMEOUT_SECONDS * 1000));

        job.complete(6_000).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.active_executions, 0);
        assert_eq!(job.completed_at, Some(6_000));
        assert_eq!(job.updated_at, 6_000);
    }

    #[test]
    fn test_begin_attempt_requires_scheduled() {
        let mut job = etl_job();
        let err = job.begin_attempt(1_000).unwrap_err();
        assert!(matches!(err, DomainError::JobNotExecutable { .. }));
        assert_eq!(job.attempts, 0);
    }

    #[test]
    fn test_begin_attempt_refused_when_breaker_open() {
        let mut job = etl_job();
        job.schedule(0, 0).unwrap();
        job.circuit_breaker_open = true;
        assert!(!job.is_ready(10));
        let err = job.begin_attempt(10).unwrap_err();
        assert_eq!(err, DomainError::CircuitBreakerOpen(job.id.clone()));
        assert_eq!(job.attempts, 0);
        assert_eq!(job.status, JobStatus::Scheduled);
    }

    #[test]
    fn test_begin_attempt_refused_once_attempts_spent() {
        let mut job = etl_job();
        job.schedule(5_000, 1_000).unwrap();
        job.max_attempts = 2;
        job.attempts = 2;

        let err = job.begin_attempt(6_000).unwrap_err();
        assert!(matches!(err, DomainError::AttemptsExhausted { max_attempts: 2, .. }));
        assert_eq!(job.status, JobStatus::Scheduled);
        assert_eq!(job.attempts, 2);

        job.fail_exhausted(6_000).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.active_executions, 0);
        assert!(job.last_error.unwrap().contains("exhausted"));
    }

    #[test]
    fn test_active_executions_never_negative() {
        let mut job = etl_job();
        job.schedule(0, 0).unwrap();
        job.begin_attempt(0).unwrap();
        job.active_executions = 0;
        job.fail(10).unwrap();
        assert_eq!(job.active_executions, 0);
    }

    #[test]
    fn test_cancel_running_requires_request() {
        let mut job = etl_job();
        job.schedule(0, 0).unwrap();
        job.begin_attempt(0).unwrap();

        assert!(job.cancel(1).is_err());
        job.request_cancel(1).unwrap();
        assert!(job.cancel_requested);
        assert_eq!(job.status, JobStatus::Running);

        job.finish_cancelled(2).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.active_executions, 0);
    }

    #[test]
    fn test_cancel_terminal_job_rejected() {
        let mut job = etl_job();
        job.schedule(0, 0).unwrap();
        job.begin_attempt(0).unwrap();
        job.complete(1).unwrap();
        assert!(matches!(
            job.cancel(2),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_timed_out() {
        let mut job = etl_job();
        job.timeout_seconds = 10;
        job.schedule(0, 0).unwrap();
        job.begin_attempt(1_000).unwrap();
        assert!(!job.is_timed_out(11_000));
        assert!(job.is_timed_out(11_001));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("PAUSED".parse::<JobStatus>().is_err());
    }
}
