//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC envelopes to the Control Service.

use crate::error::to_rpc_error;
use crate::types::{
    ArchiveResponse, CleanupResponse, CountResponse, CreateJobRequest, DeleteResponse,
    EmptyRequest, HistoryRequest, JobIdRequest, LimitRequest, ListJobsRequest,
    ResetBreakersRequest, ResetBreakersResponse, RetentionRequest, StatsRequest, UpdateRequest,
};
use jsonrpsee::types::ErrorObjectOwned;
use kairos_core::application::{ControlService, HealthReport};
use kairos_core::domain::{ExecutionRecord, Job};
use kairos_core::port::{JobStats, TypeStats};
use std::sync::Arc;

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    control: Arc<ControlService>,
}

impl RpcHandler {
    pub fn new(control: Arc<ControlService>) -> Self {
        Self { control }
    }

    /// jobs.create.v1
    pub async fn create_job(&self, req: CreateJobRequest) -> RpcResult<Job> {
        self.control.create_job(req).await.map_err(to_rpc_error)
    }

    /// jobs.get.v1
    pub async fn get_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.control.get_job(&req.job_id).await.map_err(to_rpc_error)
    }

    /// jobs.list.v1
    pub async fn list_jobs(&self, req: ListJobsRequest) -> RpcResult<Vec<Job>> {
        self.control.list_jobs(req).await.map_err(to_rpc_error)
    }

    /// jobs.count.v1
    pub async fn count_jobs(&self, req: ListJobsRequest) -> RpcResult<CountResponse> {
        let count = self.control.count_jobs(req).await.map_err(to_rpc_error)?;
        Ok(CountResponse { count })
    }

    /// jobs.update.v1
    pub async fn update_job(&self, req: UpdateRequest) -> RpcResult<Job> {
        self.control
            .update_job(&req.job_id, req.patch)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.delete.v1
    pub async fn delete_job(&self, req: JobIdRequest) -> RpcResult<DeleteResponse> {
        self.control
            .delete_job(&req.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(DeleteResponse {
            job_id: req.job_id,
            deleted: true,
        })
    }

    /// jobs.schedule.v1
    pub async fn schedule_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.control
            .schedule_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.execute_now.v1
    pub async fn execute_now(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.control
            .execute_now(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.cancel.v1
    pub async fn cancel_job(&self, req: JobIdRequest) -> RpcResult<Job> {
        self.control
            .cancel_job(&req.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.history.v1
    pub async fn history(&self, req: HistoryRequest) -> RpcResult<Vec<ExecutionRecord>> {
        self.control
            .job_history(&req.job_id, req.limit)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.ready.v1
    pub async fn ready(&self, req: LimitRequest) -> RpcResult<Vec<Job>> {
        self.control.list_ready(req.limit).await.map_err(to_rpc_error)
    }

    /// jobs.timed_out.v1
    pub async fn timed_out(&self, _req: EmptyRequest) -> RpcResult<Vec<Job>> {
        self.control.list_timed_out().await.map_err(to_rpc_error)
    }

    /// jobs.retry_ready.v1
    pub async fn retry_ready(&self, req: LimitRequest) -> RpcResult<Vec<Job>> {
        self.control
            .list_retry_ready(req.limit)
            .await
            .map_err(to_rpc_error)
    }

    /// stats.overall.v1
    pub async fn stats_overall(&self, req: StatsRequest) -> RpcResult<JobStats> {
        self.control
            .stats_overall(req.since)
            .await
            .map_err(to_rpc_error)
    }

    /// stats.by_type.v1
    pub async fn stats_by_type(&self, req: StatsRequest) -> RpcResult<Vec<TypeStats>> {
        self.control
            .stats_by_type(req.since)
            .await
            .map_err(to_rpc_error)
    }

    /// admin.reset_breakers.v1
    pub async fn reset_breakers(
        &self,
        req: ResetBreakersRequest,
    ) -> RpcResult<ResetBreakersResponse> {
        let reset = self
            .control
            .reset_circuit_breakers(req.job_ids)
            .await
            .map_err(to_rpc_error)?;
        Ok(ResetBreakersResponse { reset })
    }

    /// admin.cleanup.v1
    pub async fn cleanup(&self, req: RetentionRequest) -> RpcResult<CleanupResponse> {
        let deleted = self
            .control
            .delete_completed_older_than(req.days)
            .await
            .map_err(to_rpc_error)?;
        Ok(CleanupResponse { deleted })
    }

    /// admin.archive.v1
    pub async fn archive(&self, req: RetentionRequest) -> RpcResult<ArchiveResponse> {
        let archived = self
            .control
            .archive_older_than(req.days)
            .await
            .map_err(to_rpc_error)?;
        Ok(ArchiveResponse { archived })
    }

    /// admin.health.v1
    pub async fn health(&self, _req: EmptyRequest) -> RpcResult<HealthReport> {
        Ok(self.control.health().await)
    }
}
