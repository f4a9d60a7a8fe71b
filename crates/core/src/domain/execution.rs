// Execution Record - immutable history entry for one attempt

use crate::domain::error::DomainError;
use crate::domain::job::JobId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Timeout,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "SUCCESS",
            ExecutionOutcome::Failure => "FAILURE",
            ExecutionOutcome::Timeout => "TIMEOUT",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success)
    }
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(ExecutionOutcome::Success),
            "FAILURE" => Ok(ExecutionOutcome::Failure),
            "TIMEOUT" => Ok(ExecutionOutcome::Timeout),
            other => Err(DomainError::ValidationError(format!(
                "unknown execution outcome '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub job_id: JobId,
    /// Attempt number (1-based) this record closes
    pub attempt: i32,
    pub started_at: i64,
    pub finished_at: i64,
    pub outcome: ExecutionOutcome,
    pub duration_ms: i64,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<JobId>,
        attempt: i32,
        started_at: i64,
        finished_at: i64,
        outcome: ExecutionOutcome,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            attempt,
            started_at,
            finished_at,
            outcome,
            duration_ms: (finished_at - started_at).max(0),
            error_message,
        }
    }
}
