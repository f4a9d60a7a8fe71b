// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Job {id} is not executable in status {status}")]
    JobNotExecutable { id: String, status: String },

    #[error("Job {id} has used all {max_attempts} attempts")]
    AttemptsExhausted { id: String, max_attempts: i32 },

    #[error("Circuit breaker open for job {0}")]
    CircuitBreakerOpen(String),

    #[error("Unsupported job type: {0}")]
    UnsupportedJobType(String),

    #[error("Invalid parameters for {job_type}: {reason}")]
    InvalidParameters { job_type: String, reason: String },

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid priority: {0}")]
    InvalidPriority(i32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
