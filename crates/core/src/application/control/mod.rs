// Control Service - operational use cases behind the Control API

mod requests;
#[cfg(test)]
mod control_test;

pub use requests::{CreateJobRequest, UpdateJobRequest, DEFAULT_GROUP};

use crate::application::constants::{
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_JOB_TIMEOUT_SECS, MAX_LIST_LIMIT,
};
use crate::application::maintenance::MaintenanceSweeper;
use crate::application::orchestrator::Orchestrator;
use crate::domain::{
    DomainError, ExecutionRecord, Job, JobFamily, JobId, JobParameters, JobStatus,
};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, JobFilter, JobStats, JobStore, Maintenance, StorageStats, TimeProvider, TypeStats,
};
use requests::Limits;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Attempts for cancel when it races with the orchestrator's own writes
const CANCEL_MAX_RETRIES: usize = 3;

/// Default page size for list queries
const DEFAULT_LIST_LIMIT: i64 = 100;

/// Health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub version: String,
    pub store_reachable: bool,
    pub storage: Option<StorageStats>,
    pub in_flight_executions: usize,
    pub detached_executions: u64,
    pub registered_families: Vec<JobFamily>,
}

/// Control Service
pub struct ControlService {
    store: Arc<dyn JobStore>,
    orchestrator: Arc<Orchestrator>,
    sweeper: Arc<MaintenanceSweeper>,
    maintenance: Arc<dyn Maintenance>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    limits: Limits,
}

impl ControlService {
    pub fn new(
        store: Arc<dyn JobStore>,
        orchestrator: Arc<Orchestrator>,
        sweeper: Arc<MaintenanceSweeper>,
        maintenance: Arc<dyn Maintenance>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            sweeper,
            maintenance,
            id_provider,
            time_provider,
            limits: Limits {
                max_job_timeout_secs: DEFAULT_MAX_JOB_TIMEOUT_SECS,
            },
        }
    }

    /// Override the largest accepted `timeout_seconds`
    pub fn with_max_job_timeout_secs(mut self, secs: i64) -> Self {
        self.limits.max_job_timeout_secs = secs;
        self
    }

    /// Create a job. Parameters are parsed against the type's schema here,
    /// never at dispatch time.
    pub async fn create_job(&self, req: CreateJobRequest) -> Result<Job> {
        self.limits.name("name", &req.name)?;
        self.limits.name("group", &req.group)?;
        if !self.orchestrator.dispatcher().supports(req.job_type) {
            return Err(DomainError::UnsupportedJobType(req.job_type.to_string()).into());
        }
        req.schedule.validate()?;
        let parameters = JobParameters::parse(req.job_type, req.parameters)?;

        let now = self.time_provider.now_millis();
        let mut job = Job::new(
            self.id_provider.generate_id(),
            now,
            req.name,
            req.group,
            req.job_type,
            parameters,
            req.schedule,
        );

        if let Some(priority) = req.priority {
            self.limits.priority(priority)?;
            job.priority = priority;
        }
        if let Some(max_attempts) = req.max_attempts {
            self.limits.max_attempts(max_attempts)?;
            job.max_attempts = max_attempts;
        }
        if let Some(timeout) = req.timeout_seconds {
            self.limits.timeout(timeout)?;
            job.timeout_seconds = timeout;
        }
        if let Some(backoff) = req.backoff_delay_ms {
            self.limits.backoff(backoff)?;
            job.backoff_delay_ms = backoff;
        }

        if req.schedule_now {
            let first = job.schedule.first_occurrence(now)?;
            job.schedule(first, now)?;
        }

        self.store.insert(&job).await?;
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            status = %job.status,
            next_execution_at = ?job.next_execution_at,
            "Job created"
        );
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job> {
        self.load(id).await
    }

    pub async fn list_jobs(&self, mut filter: JobFilter) -> Result<Vec<Job>> {
        filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT));
        filter.offset = Some(filter.offset.unwrap_or(0).max(0));
        self.store.list(&filter).await
    }

    pub async fn count_jobs(&self, filter: JobFilter) -> Result<i64> {
        self.store.count(&filter).await
    }

    /// Patch a job that has not started running yet (CREATED or SCHEDULED)
    pub async fn update_job(&self, id: &JobId, patch: UpdateJobRequest) -> Result<Job> {
        if patch.is_empty() {
            return Err(AppError::Validation("update contains no fields".into()));
        }

        let mut job = self.load(id).await?;
        if !matches!(job.status, JobStatus::Created | JobStatus::Scheduled) {
            return Err(AppError::Conflict(format!(
                "job {} is {}; only CREATED or SCHEDULED jobs can be updated",
                id, job.status
            )));
        }

        let now = self.time_provider.now_millis();
        if let Some(name) = patch.name {
            self.limits.name("name", &name)?;
            job.name = name;
        }
        if let Some(group) = patch.group {
            self.limits.name("group", &group)?;
            job.group = group;
        }
        if let Some(priority) = patch.priority {
            self.limits.priority(priority)?;
            job.priority = priority;
        }
        if let Some(raw) = patch.parameters {
            job.parameters = JobParameters::parse(job.job_type, raw)?;
        }
        if let Some(max_attempts) = patch.max_attempts {
            self.limits.max_attempts(max_attempts)?;
            if job.attempts > 0 && max_attempts <= job.attempts {
                return Err(AppError::Validation(format!(
                    "max_attempts {} leaves no attempt after the {} already used",
                    max_attempts, job.attempts
                )));
            }
            job.max_attempts = max_attempts;
        }
        if let Some(timeout) = patch.timeout_seconds {
            self.limits.timeout(timeout)?;
            job.timeout_seconds = timeout;
        }
        if let Some(backoff) = patch.backoff_delay_ms {
            self.limits.backoff(backoff)?;
            job.backoff_delay_ms = backoff;
        }
        if let Some(schedule) = patch.schedule {
            schedule.validate()?;
            if job.status == JobStatus::Scheduled {
                job.next_execution_at = Some(schedule.first_occurrence(now)?);
            }
            job.schedule = schedule;
        }
        job.updated_at = now;

        let saved = self.store.save(&job).await?;
        info!(job_id = %saved.id, version = saved.version, "Job updated");
        Ok(saved)
    }

    /// Delete a job and its history. RUNNING jobs must be cancelled first.
    pub async fn delete_job(&self, id: &JobId) -> Result<()> {
        let job = self.load(id).await?;
        if job.status == JobStatus::Running {
            return Err(AppError::Conflict(format!(
                "job {} is RUNNING; cancel it before deleting",
                id
            )));
        }
        self.store.delete(id, job.version).await?;
        info!(job_id = %id, "Job deleted");
        Ok(())
    }

    /// CREATED -> SCHEDULED at the schedule's first occurrence
    pub async fn schedule_job(&self, id: &JobId) -> Result<Job> {
        let mut job = self.load(id).await?;
        let now = self.time_provider.now_millis();
        let first = job.schedule.first_occurrence(now)?;
        job.schedule(first, now)?;
        let saved = self.store.save(&job).await?;
        info!(job_id = %saved.id, next_execution_at = first, "Job scheduled");
        Ok(saved)
    }

    /// Make the job due now and dispatch it in the background
    pub async fn execute_now(&self, id: &JobId) -> Result<Job> {
        let job = self.orchestrator.prepare_immediate(id).await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let job_id = job.id.clone();
        tokio::spawn(async move {
            let outcome = orchestrator.on_due(&job_id).await;
            info!(job_id = %job_id, ?outcome, "Immediate execution finished");
        });

        Ok(job)
    }

    /// Cancel a job
    ///
    /// CREATED and SCHEDULED jobs are cancelled immediately. For a RUNNING job
    /// only the intent is recorded and the execution's cancellation token is
    /// fired; the job becomes CANCELLED when the attempt ends.
    pub async fn cancel_job(&self, id: &JobId) -> Result<Job> {
        for _ in 0..CANCEL_MAX_RETRIES {
            let mut job = self.load(id).await?;
            let now = self.time_provider.now_millis();

            let running = job.status == JobStatus::Running;
            if running {
                job.request_cancel(now)?;
            } else {
                job.cancel(now)?;
            }

            match self.store.save(&job).await {
                Ok(saved) => {
                    if running {
                        let signalled = self.orchestrator.signal_cancel(id);
                        info!(job_id = %id, signalled, "Cancel requested for running job");
                    } else {
                        info!(job_id = %id, "Job cancelled");
                    }
                    return Ok(saved);
                }
                Err(e) if e.is_version_conflict() => {
                    warn!(job_id = %id, "Job changed during cancel, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(format!(
            "job {} kept changing during cancel",
            id
        )))
    }

    /// Execution records of a job, newest first
    pub async fn job_history(&self, id: &JobId, limit: Option<i64>) -> Result<Vec<ExecutionRecord>> {
        self.load(id).await?;
        let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT).clamp(1, MAX_LIST_LIMIT);
        self.store.find_executions(id, limit).await
    }

    pub async fn list_ready(&self, limit: Option<i64>) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        self.store.find_ready(now, Self::page(limit)).await
    }

    pub async fn list_timed_out(&self) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        self.store.find_timed_out(now).await
    }

    pub async fn list_retry_ready(&self, limit: Option<i64>) -> Result<Vec<Job>> {
        let now = self.time_provider.now_millis();
        self.store.find_retry_ready(now, Self::page(limit)).await
    }

    pub async fn stats_overall(&self, since: Option<i64>) -> Result<JobStats> {
        self.store.stats(since).await
    }

    pub async fn stats_by_type(&self, since: Option<i64>) -> Result<Vec<TypeStats>> {
        self.store.stats_by_type(since).await
    }

    /// Close breakers of the given jobs, or every open breaker. Jobs failed by
    /// a breaker trip stay FAILED.
    pub async fn reset_circuit_breakers(&self, ids: Option<Vec<JobId>>) -> Result<usize> {
        self.sweeper.reset_breakers(ids.as_deref()).await
    }

    /// Delete terminal jobs older than `days`
    pub async fn delete_completed_older_than(&self, days: i64) -> Result<u64> {
        self.sweeper.delete_terminal_older_than(days).await
    }

    pub async fn archive_older_than(&self, days: i64) -> Result<u64> {
        self.sweeper.archive_older_than(days).await
    }

    pub async fn health(&self) -> HealthReport {
        let store_reachable = self.maintenance.ping().await.is_ok();
        let storage = if store_reachable {
            self.maintenance.get_stats().await.ok()
        } else {
            None
        };

        HealthReport {
            healthy: store_reachable,
            version: crate::VERSION.to_string(),
            store_reachable,
            storage,
            in_flight_executions: self.orchestrator.in_flight_count(),
            detached_executions: self.orchestrator.detached_count(),
            registered_families: self.orchestrator.dispatcher().registered_families(),
        }
    }

    async fn load(&self, id: &JobId) -> Result<Job> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    fn page(limit: Option<i64>) -> i64 {
        limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}
