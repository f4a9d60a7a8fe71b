//! RPC Request/Response Types
//!
//! Job creation, updates and list filters reuse the core request types;
//! everything else is a thin envelope defined here.

use kairos_core::domain::JobId;
use serde::{Deserialize, Serialize};

pub use kairos_core::application::{CreateJobRequest, UpdateJobRequest};
pub use kairos_core::port::JobFilter as ListJobsRequest;

/// jobs.get / delete / schedule / execute_now / cancel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdRequest {
    pub job_id: JobId,
}

/// jobs.update.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub job_id: JobId,
    #[serde(flatten)]
    pub patch: UpdateJobRequest,
}

/// jobs.history.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// jobs.ready / retry_ready
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimitRequest {
    #[serde(default)]
    pub limit: Option<i64>,
}

/// stats.overall / by_type
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    /// Only jobs created and executions started at or after this (epoch ms)
    #[serde(default)]
    pub since: Option<i64>,
}

/// admin.reset_breakers.v1 - omit `job_ids` to reset every open breaker
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResetBreakersRequest {
    #[serde(default)]
    pub job_ids: Option<Vec<JobId>>,
}

/// admin.cleanup / archive
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionRequest {
    pub days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub job_id: JobId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetBreakersResponse {
    pub reset: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveResponse {
    pub archived: u64,
}
