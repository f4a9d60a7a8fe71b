// Control API requests and their validation

use crate::domain::job::{MAX_PRIORITY, MIN_PRIORITY};
use crate::domain::{DomainError, JobType, Priority, Schedule};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "default";

const MAX_NAME_LEN: usize = 255;
const MAX_ATTEMPTS_LIMIT: i32 = 100;
/// One day
const MAX_BACKOFF_DELAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Create request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    #[serde(default = "default_group")]
    pub group: String,
    pub job_type: JobType,
    #[serde(default = "empty_object")]
    pub parameters: serde_json::Value,
    pub schedule: Schedule,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub backoff_delay_ms: Option<i64>,
    /// Move straight to SCHEDULED (otherwise stays CREATED until `scheduleJob`)
    #[serde(default = "default_true")]
    pub schedule_now: bool,
}

/// Partial update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateJobRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default)]
    pub max_attempts: Option<i32>,
    #[serde(default)]
    pub timeout_seconds: Option<i64>,
    #[serde(default)]
    pub backoff_delay_ms: Option<i64>,
}

impl UpdateJobRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.group.is_none()
            && self.priority.is_none()
            && self.parameters.is_none()
            && self.schedule.is_none()
            && self.max_attempts.is_none()
            && self.timeout_seconds.is_none()
            && self.backoff_delay_ms.is_none()
    }
}

fn default_group() -> String {
    DEFAULT_GROUP.to_string()
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

/// Field validators shared by create and update
pub(crate) struct Limits {
    pub max_job_timeout_secs: i64,
}

impl Limits {
    pub fn name(&self, field: &str, value: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(AppError::Validation(format!("{} cannot be empty", field)));
        }
        if value.len() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "{} too long (max {} characters)",
                field, MAX_NAME_LEN
            )));
        }
        Ok(())
    }

    pub fn priority(&self, priority: Priority) -> Result<()> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(DomainError::InvalidPriority(priority).into());
        }
        Ok(())
    }

    pub fn max_attempts(&self, max_attempts: i32) -> Result<()> {
        if !(1..=MAX_ATTEMPTS_LIMIT).contains(&max_attempts) {
            return Err(AppError::Validation(format!(
                "max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT, max_attempts
            )));
        }
        Ok(())
    }

    pub fn timeout(&self, timeout_seconds: i64) -> Result<()> {
        if !(1..=self.max_job_timeout_secs).contains(&timeout_seconds) {
            return Err(AppError::Validation(format!(
                "timeout_seconds must be between 1 and {}, got {}",
                self.max_job_timeout_secs, timeout_seconds
            )));
        }
        Ok(())
    }

    pub fn backoff(&self, backoff_delay_ms: i64) -> Result<()> {
        if !(0..=MAX_BACKOFF_DELAY_MS).contains(&backoff_delay_ms) {
            return Err(AppError::Validation(format!(
                "backoff_delay_ms must be between 0 and {}, got {}",
                MAX_BACKOFF_DELAY_MS, backoff_delay_ms
            )));
        }
        Ok(())
    }
}
