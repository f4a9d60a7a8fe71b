// Attempt outcome resolution
//
// Shared by the orchestrator (normal completion) and the maintenance sweeper
// (timeout reclamation) so both apply the same failure path.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::retry::{BackoffPolicy, RetryDecision};
use crate::domain::{DomainError, ExecutionOutcome, Job};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// How an attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Succeeded { summary: Option<String> },
    Failed(String),
    TimedOut(String),
}

impl AttemptResult {
    pub fn outcome(&self) -> ExecutionOutcome {
        match self {
            AttemptResult::Succeeded { .. } => ExecutionOutcome::Success,
            AttemptResult::Failed(_) => ExecutionOutcome::Failure,
            AttemptResult::TimedOut(_) => ExecutionOutcome::Timeout,
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            AttemptResult::Succeeded { .. } => None,
            AttemptResult::Failed(msg) | AttemptResult::TimedOut(msg) => Some(msg.clone()),
        }
    }
}

/// State the job was moved to after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resolution {
    /// One-shot job finished
    Completed,
    /// Recurring job succeeded and waits for its next occurrence
    Rescheduled { next_execution_at: i64 },
    /// Failed attempt, another one is scheduled
    RetryScheduled { next_execution_at: i64 },
    /// Failed terminally (attempts exhausted or retry not allowed)
    Failed,
    /// Failed terminally because the circuit breaker opened
    BreakerTripped,
    /// Cancel was requested while the attempt ran
    Cancelled,
}

impl Resolution {
    /// Administrative cancel produces no execution record
    pub fn writes_record(&self) -> bool {
        !matches!(self, Resolution::Cancelled)
    }
}

/// Applies an attempt result to a RUNNING job
#[derive(Clone)]
pub struct OutcomeResolver {
    breaker: CircuitBreaker,
    backoff: Arc<dyn BackoffPolicy>,
}

impl OutcomeResolver {
    pub fn new(breaker: CircuitBreaker, backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self { breaker, backoff }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Move `job` out of RUNNING according to `result`
    ///
    /// # Arguments
    /// * `allow_retry` - false forces a failure to be terminal
    pub fn resolve(
        &self,
        job: &mut Job,
        result: &AttemptResult,
        now_millis: i64,
        allow_retry: bool,
    ) -> Result<Resolution, DomainError> {
        if job.cancel_requested {
            job.finish_cancelled(now_millis)?;
            return Ok(Resolution::Cancelled);
        }

        match result {
            AttemptResult::Succeeded { .. } => self.resolve_success(job, now_millis),
            AttemptResult::Failed(msg) | AttemptResult::TimedOut(msg) => {
                self.resolve_failure(job, msg, now_millis, allow_retry)
            }
        }
    }

    fn resolve_success(&self, job: &mut Job, now_millis: i64) -> Result<Resolution, DomainError> {
        let next = if job.is_recurring() {
            match job.schedule.next_occurrence(now_millis) {
                Ok(next) => next,
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Cannot compute next occurrence, completing job");
                    None
                }
            }
        } else {
            None
        };

        match next {
            Some(next_execution_at) => {
                job.reschedule(next_execution_at, now_millis)?;
                job.attempts = 0;
                job.consecutive_failures = 0;
                job.last_error = None;
                Ok(Resolution::Rescheduled { next_execution_at })
            }
            None => {
                job.complete(now_millis)?;
                Ok(Resolution::Completed)
            }
        }
    }

    fn resolve_failure(
        &self,
        job: &mut Job,
        message: &str,
        now_millis: i64,
        allow_retry: bool,
    ) -> Result<Resolution, DomainError> {
        job.last_error = Some(message.to_string());

        self.breaker.record_failure(job, now_millis);
        if job.circuit_breaker_open {
            job.fail(now_millis)?;
            return Ok(Resolution::BreakerTripped);
        }

        if allow_retry {
            if let RetryDecision::RetryAt(next_execution_at) = self.backoff.decide(job, now_millis) {
                job.reschedule(next_execution_at, now_millis)?;
                return Ok(Resolution::RetryScheduled { next_execution_at });
            }
        }

        job.fail(now_millis)?;
        Ok(Resolution::Failed)
    }
}
