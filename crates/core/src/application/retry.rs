// Retry / Backoff policy
use crate::application::constants::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_BACKOFF_MS};
use crate::domain::Job;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry at this timestamp (epoch ms)
    RetryAt(i64),
    /// Attempts exhausted, the job fails permanently
    Exhausted,
}

/// Pluggable backoff strategy
///
/// Implementations are pure: the same job and `now` always produce the same
/// decision, so the orchestrator and the sweeper can share one instance.
pub trait BackoffPolicy: Send + Sync {
    /// Delay before the next attempt, given the attempt that just failed (1-based)
    fn delay_ms(&self, job: &Job, failed_attempt: i32) -> i64;

    /// Decide whether a job that just failed gets another attempt
    fn decide(&self, job: &Job, now_millis: i64) -> RetryDecision {
        if job.attempts >= job.max_attempts {
            warn!(
                job_id = %job.id,
                attempts = job.attempts,
                max_attempts = job.max_attempts,
                "Max retry attempts reached"
            );
            return RetryDecision::Exhausted;
        }

        let delay_ms = self.delay_ms(job, job.attempts).max(0);
        debug!(
            job_id = %job.id,
            attempt = job.attempts,
            delay_ms,
            "Scheduling retry"
        );
        RetryDecision::RetryAt(now_millis + delay_ms)
    }
}

/// Same delay after every failure (`job.backoff_delay_ms`)
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDelay;

impl BackoffPolicy for FixedDelay {
    fn delay_ms(&self, job: &Job, _failed_attempt: i32) -> i64 {
        job.backoff_delay_ms
    }
}

/// `backoff_delay_ms * factor^(attempt-1)`, capped, with ±10% jitter
///
/// Jitter is seeded from the job id so a given job always backs off the same
/// way, while different jobs spread out.
#[derive(Debug, Clone, Copy)]
pub struct Exponential {
    pub factor: f64,
    pub max_delay_ms: i64,
}

impl Default for Exponential {
    fn default() -> Self {
        Self {
            factor: DEFAULT_BACKOFF_FACTOR,
            max_delay_ms: DEFAULT_MAX_BACKOFF_MS,
        }
    }
}

impl BackoffPolicy for Exponential {
    fn delay_ms(&self, job: &Job, failed_attempt: i32) -> i64 {
        let exponent = (failed_attempt - 1).max(0);
        let base = job.backoff_delay_ms as f64 * self.factor.powi(exponent);

        let jitter_seed = job.id.chars().map(|c| c as u32).sum::<u32>();
        let jitter_factor = 0.9 + ((jitter_seed % 21) as f64 / 100.0); // 0.9 to 1.1

        ((base * jitter_factor) as i64).min(self.max_delay_ms)
    }
}

/// Strategy selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    #[default]
    Fixed,
    Exponential,
}

impl BackoffStrategy {
    pub fn build(self, factor: f64, max_delay_ms: i64) -> Box<dyn BackoffPolicy> {
        match self {
            BackoffStrategy::Fixed => Box::new(FixedDelay),
            BackoffStrategy::Exponential => Box::new(Exponential {
                factor,
                max_delay_ms,
            }),
        }
    }
}
