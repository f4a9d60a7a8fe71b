// Maintenance Sweeper
// Timeout reclamation, archival, retention cleanup, breaker cool-down, VACUUM

use crate::application::constants::{
    DEFAULT_MAX_DB_SIZE_MB, DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL, MS_PER_DAY,
};
use crate::application::orchestrator::{AttemptResult, OutcomeResolver};
use crate::application::shutdown::ShutdownToken;
use crate::domain::{ExecutionRecord, Job, JobId, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, JobStore, Maintenance, TimeProvider};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

/// CAS attempts for administrative breaker resets
const RESET_MAX_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub interval: Duration,
    /// Delete terminal jobs older than this. `None` keeps them forever.
    pub retention_days: Option<i64>,
    /// Archive terminal jobs older than this. `None` disables archival.
    pub archive_after_days: Option<i64>,
    /// Reclaimed (timed-out) jobs follow the retry path instead of failing
    pub retry_reclaimed_jobs: bool,
    pub max_db_size_mb: f64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            retention_days: Some(DEFAULT_RETENTION_DAYS),
            archive_after_days: None,
            retry_reclaimed_jobs: false,
            max_db_size_mb: DEFAULT_MAX_DB_SIZE_MB,
        }
    }
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub reclaimed: usize,
    /// Stuck jobs whose reclamation hit a store error; retried next sweep
    pub reclaim_failed: usize,
    pub archived: u64,
    pub deleted: u64,
    pub breakers_closed: usize,
    pub vacuumed_mb: Option<f64>,
}

/// Maintenance sweeper
///
/// Every write is a version-checked save, so several instances may sweep the
/// same store concurrently.
pub struct MaintenanceSweeper {
    store: Arc<dyn JobStore>,
    maintenance: Arc<dyn Maintenance>,
    resolver: OutcomeResolver,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: SweeperConfig,
}

impl MaintenanceSweeper {
    pub fn new(
        store: Arc<dyn JobStore>,
        maintenance: Arc<dyn Maintenance>,
        resolver: OutcomeResolver,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            store,
            maintenance,
            resolver,
            id_provider,
            time_provider,
            config,
        }
    }

    /// Run the sweep loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            retention_days = ?self.config.retention_days,
            archive_after_days = ?self.config.archive_after_days,
            "Maintenance sweeper started"
        );

        let mut tick = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    let report = self.sweep_once().await;
                    if report != SweepReport::default() {
                        info!(?report, "Sweep completed");
                    }
                }
                _ = shutdown.wait() => break,
            }
        }

        info!("Maintenance sweeper stopped");
    }

    /// One full pass. A failing step is logged and does not stop the others.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        match self.reclaim_pass().await {
            Ok((reclaimed, failed)) => {
                report.reclaimed = reclaimed;
                report.reclaim_failed = failed;
            }
            Err(e) => error!(error = %e, "Timeout reclamation failed"),
        }

        if let Some(days) = self.config.archive_after_days {
            match self.archive_older_than(days).await {
                Ok(n) => report.archived = n,
                Err(e) => error!(error = %e, "Archival failed"),
            }
        }

        if let Some(days) = self.config.retention_days {
            match self.delete_terminal_older_than(days).await {
                Ok(n) => report.deleted = n,
                Err(e) => error!(error = %e, "Retention cleanup failed"),
            }
        }

        match self.cool_down_breakers().await {
            Ok(n) => report.breakers_closed = n,
            Err(e) => error!(error = %e, "Breaker cool-down failed"),
        }

        match self.vacuum_if_needed().await {
            Ok(reclaimed) => report.vacuumed_mb = reclaimed,
            Err(e) => error!(error = %e, "VACUUM failed"),
        }

        report
    }

    /// Fail (or retry) every job stuck RUNNING past its deadline
    ///
    /// # Returns
    /// Number of jobs this instance reclaimed. Jobs reclaimed concurrently by
    /// another instance are skipped.
    pub async fn reclaim_timed_out(&self) -> Result<usize> {
        self.reclaim_pass().await.map(|(reclaimed, _)| reclaimed)
    }

    /// (reclaimed, failed). A store error on one job does not stop the pass.
    async fn reclaim_pass(&self) -> Result<(usize, usize)> {
        let now = self.time_provider.now_millis();
        let stuck = self.store.find_timed_out(now).await?;
        let mut reclaimed = 0;
        let mut failed = 0;

        for job in stuck {
            let id = job.id.clone();
            match self.reclaim(job, now).await {
                Ok(true) => reclaimed += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to reclaim timed-out job");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            warn!(reclaimed, failed, "Timeout reclamation incomplete");
        }
        Ok((reclaimed, failed))
    }

    async fn reclaim(&self, job: Job, now: i64) -> Result<bool> {
        let result = AttemptResult::TimedOut(format!(
            "Execution timed out after {}s (reclaimed by sweeper)",
            job.timeout_seconds
        ));

        let mut next = job.clone();
        let resolution = match self.resolver.resolve(
            &mut next,
            &result,
            now,
            self.config.retry_reclaimed_jobs,
        ) {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Cannot reclaim job");
                return Ok(false);
            }
        };

        let write = if resolution.writes_record() {
            let record = ExecutionRecord::new(
                self.id_provider.generate_id(),
                job.id.clone(),
                job.attempts,
                job.started_at.unwrap_or(now),
                now,
                result.outcome(),
                result.error_message(),
            );
            self.store.save_with_record(&next, &record).await
        } else {
            self.store.save(&next).await
        };

        match write {
            Ok(saved) => {
                warn!(
                    job_id = %saved.id,
                    attempt = job.attempts,
                    status = %saved.status,
                    "Reclaimed timed-out execution"
                );
                Ok(true)
            }
            Err(AppError::VersionConflict { .. }) | Err(AppError::NotFound(_)) => {
                debug!(job_id = %job.id, "Timed-out job already handled elsewhere");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Hard-delete terminal jobs older than `days`
    pub async fn delete_terminal_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = self.cutoff(days)?;
        let deleted = self
            .store
            .delete_older_than(&JobStatus::TERMINAL, cutoff)
            .await?;
        if deleted > 0 {
            info!(deleted, days, "Deleted old terminal jobs");
        }
        Ok(deleted)
    }

    /// Move terminal jobs older than `days` to the archive tables
    pub async fn archive_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = self.cutoff(days)?;
        let archived = self.store.archive_older_than(cutoff).await?;
        if archived > 0 {
            info!(archived, days, "Archived old terminal jobs");
        }
        Ok(archived)
    }

    /// Close breakers whose cool-down has elapsed (no-op when cool-down is disabled)
    ///
    /// A tripped job is already FAILED, which is terminal. Closing its breaker
    /// clears the failure streak but never makes the job dispatchable again;
    /// recreate the job to resume the work.
    pub async fn cool_down_breakers(&self) -> Result<usize> {
        if self.resolver.breaker().config().cool_down.is_none() {
            return Ok(0);
        }

        let now = self.time_provider.now_millis();
        let mut closed = 0;
        for job in self.store.find_open_breakers().await? {
            if self.resolver.breaker().cool_down_elapsed(&job, now) && self.reset_one(job).await? {
                closed += 1;
            }
        }
        Ok(closed)
    }

    /// Administrative reset. `None` resets every open breaker.
    ///
    /// Only the breaker state changes. A job failed by its breaker trip stays
    /// FAILED and will not run again.
    ///
    /// # Returns
    /// Number of breakers closed
    pub async fn reset_breakers(&self, ids: Option<&[JobId]>) -> Result<usize> {
        let targets = match ids {
            None => self.store.find_open_breakers().await?,
            Some(ids) => {
                let mut jobs = Vec::with_capacity(ids.len());
                for id in ids {
                    match self.store.find_by_id(id).await? {
                        Some(job) => jobs.push(job),
                        None => return Err(AppError::NotFound(format!("job {}", id))),
                    }
                }
                jobs
            }
        };

        let mut reset = 0;
        for job in targets {
            if self.reset_one(job).await? {
                reset += 1;
            }
        }
        info!(reset, "Circuit breakers reset");
        Ok(reset)
    }

    async fn reset_one(&self, mut job: Job) -> Result<bool> {
        for _ in 0..RESET_MAX_RETRIES {
            if !job.circuit_breaker_open && job.consecutive_failures == 0 {
                return Ok(false);
            }
            job.reset_circuit_breaker(self.time_provider.now_millis());
            match self.store.save(&job).await {
                Ok(_) => {
                    info!(job_id = %job.id, "Circuit breaker closed");
                    return Ok(true);
                }
                Err(AppError::VersionConflict { .. }) => {
                    match self.store.find_by_id(&job.id).await? {
                        Some(fresh) => job = fresh,
                        None => return Ok(false),
                    }
                }
                Err(AppError::NotFound(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(format!(
            "job {} kept changing during breaker reset",
            job.id
        )))
    }

    async fn vacuum_if_needed(&self) -> Result<Option<f64>> {
        let stats = self.maintenance.get_stats().await?;
        if stats.db_size_mb <= self.config.max_db_size_mb {
            return Ok(None);
        }
        info!(
            db_size_mb = stats.db_size_mb,
            max_db_size_mb = self.config.max_db_size_mb,
            "Database above size limit, running VACUUM"
        );
        self.maintenance.vacuum().await.map(Some)
    }

    fn cutoff(&self, days: i64) -> Result<i64> {
        if days < 0 {
            return Err(AppError::Validation(format!(
                "retention must be >= 0 days, got {}",
                days
            )));
        }
        Ok(self.time_provider.now_millis() - days * MS_PER_DAY)
    }
}
