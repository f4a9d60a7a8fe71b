// Per-job circuit breaker
//
// All breaker state lives on the job row (consecutive_failures,
// circuit_breaker_open, breaker_opened_at); this type only holds the policy.

use crate::application::constants::DEFAULT_BREAKER_THRESHOLD;
use crate::domain::Job;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub threshold: i32,
    /// Close open breakers automatically after this long. `None` = manual reset only.
    /// A trip fails the job terminally, so closing the breaker does not resume it.
    pub cool_down: Option<Duration>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_BREAKER_THRESHOLD,
            cool_down: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Count one failure; opens the breaker once the threshold is reached.
    ///
    /// # Returns
    /// true if this failure tripped the breaker
    pub fn record_failure(&self, job: &mut Job, now_millis: i64) -> bool {
        job.consecutive_failures += 1;
        if !job.circuit_breaker_open && job.consecutive_failures >= self.config.threshold {
            job.circuit_breaker_open = true;
            job.breaker_opened_at = Some(now_millis);
            warn!(
                job_id = %job.id,
                consecutive_failures = job.consecutive_failures,
                threshold = self.config.threshold,
                "Circuit breaker opened"
            );
            return true;
        }
        false
    }

    /// Whether an open breaker has waited out its cool-down
    pub fn cool_down_elapsed(&self, job: &Job, now_millis: i64) -> bool {
        match (self.config.cool_down, job.circuit_breaker_open) {
            (Some(cool_down), true) => job
                .breaker_opened_at
                .is_some_and(|opened| opened + cool_down.as_millis() as i64 <= now_millis),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobParameters, JobType, Schedule};
    use serde_json::json;

    fn job() -> Job {
        let params =
            JobParameters::parse(JobType::MonitoringHealthCheck, json!({"target": "http://svc"}))
                .unwrap();
        Job::new_test(JobType::MonitoringHealthCheck, params, Schedule::every(60))
    }

    #[test]
    fn test_trips_at_threshold() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 3,
            cool_down: None,
        });
        let mut job = job();

        assert!(!breaker.record_failure(&mut job, 10));
        assert!(!breaker.record_failure(&mut job, 20));
        assert!(breaker.record_failure(&mut job, 30));
        assert!(job.circuit_breaker_open);
        assert_eq!(job.breaker_opened_at, Some(30));

        // Already open: no second trip, opened_at unchanged
        assert!(!breaker.record_failure(&mut job, 40));
        assert_eq!(job.breaker_opened_at, Some(30));
    }

    #[test]
    fn test_cool_down_disabled_by_default() {
        let breaker = CircuitBreaker::default();
        let mut job = job();
        job.circuit_breaker_open = true;
        job.breaker_opened_at = Some(0);
        assert!(!breaker.cool_down_elapsed(&job, i64::MAX));
    }

    #[test]
    fn test_cool_down_elapsed() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            threshold: 1,
            cool_down: Some(Duration::from_secs(60)),
        });
        let mut job = job();
        breaker.record_failure(&mut job, 1_000);
        assert!(!breaker.cool_down_elapsed(&job, 60_999));
        assert!(breaker.cool_down_elapsed(&job, 61_000));
    }
}
