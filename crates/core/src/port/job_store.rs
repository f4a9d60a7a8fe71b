// Job Store Port (Interface)

use crate::domain::{ExecutionRecord, Job, JobId, JobStatus, JobType, Priority};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Filters for listing and counting jobs. Every set field narrows the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFilter {
    /// Substring match on name
    pub name: Option<String>,
    pub group: Option<String>,
    pub job_type: Option<JobType>,
    pub status: Option<JobStatus>,
    pub priority: Option<Priority>,
    /// Only jobs created at or after this timestamp (epoch ms)
    pub created_since: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl JobFilter {
    pub fn by_status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// In-memory evaluation (limit/offset are applied by the caller)
    pub fn matches(&self, job: &Job) -> bool {
        self.name.as_ref().map_or(true, |n| job.name.contains(n.as_str()))
            && self.group.as_ref().map_or(true, |g| &job.group == g)
            && self.job_type.map_or(true, |t| job.job_type == t)
            && self.status.map_or(true, |s| job.status == s)
            && self.priority.map_or(true, |p| job.priority == p)
            && self.created_since.map_or(true, |since| job.created_at >= since)
    }
}

/// Aggregated counters over jobs and their execution history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStats {
    pub total_jobs: i64,
    pub by_status: BTreeMap<JobStatus, i64>,
    pub executions: i64,
    pub successes: i64,
    pub failures: i64,
    pub timeouts: i64,
    pub avg_duration_ms: Option<f64>,
    pub open_breakers: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub job_type: JobType,
    pub stats: JobStats,
}

/// Durable record of jobs and their execution history
///
/// Every state-changing write is a compare-and-swap on `(id, version)`.
/// That is the only concurrency primitive the engine relies on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job (version as given)
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Find job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>>;

    /// Optimistic update
    ///
    /// Writes `job` only if the stored version equals `job.version`, and
    /// returns the job carrying the bumped version.
    ///
    /// # Errors
    /// - AppError::VersionConflict if the row changed since it was read
    /// - AppError::NotFound if the row is gone
    async fn save(&self, job: &Job) -> Result<Job>;

    /// Optimistic update plus one execution record, in a single transaction.
    /// On conflict neither is written.
    async fn save_with_record(&self, job: &Job, record: &ExecutionRecord) -> Result<Job>;

    /// Delete a job and its history if the stored version matches
    async fn delete(&self, id: &JobId, expected_version: i64) -> Result<()>;

    /// SCHEDULED, `next_execution_at <= now`, breaker closed.
    /// Ordered by priority (high first), then due time.
    async fn find_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>>;

    /// RUNNING and `started_at + timeout_seconds < now`
    async fn find_timed_out(&self, now: i64) -> Result<Vec<Job>>;

    /// Ready jobs that already consumed at least one attempt
    async fn find_retry_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>>;

    /// Jobs whose circuit breaker is open
    async fn find_open_breakers(&self) -> Result<Vec<Job>>;

    /// Jobs matching `filter`, newest first
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Number of jobs matching `filter` (limit/offset ignored)
    async fn count(&self, filter: &JobFilter) -> Result<i64>;

    /// Execution history of a job, newest first
    async fn find_executions(&self, job_id: &JobId, limit: i64) -> Result<Vec<ExecutionRecord>>;

    /// Hard-delete jobs in one of `statuses` last touched before `cutoff`.
    /// Non-terminal statuses are ignored.
    ///
    /// # Returns
    /// Number of jobs deleted
    async fn delete_older_than(&self, statuses: &[JobStatus], cutoff: i64) -> Result<u64>;

    /// Move terminal jobs last touched before `cutoff` (and their history) to cold storage
    ///
    /// # Returns
    /// Number of jobs archived
    async fn archive_older_than(&self, cutoff: i64) -> Result<u64>;

    /// Counters over jobs created and executions started at or after `since`
    async fn stats(&self, since: Option<i64>) -> Result<JobStats>;

    /// Same counters, split by job type
    async fn stats_by_type(&self, since: Option<i64>) -> Result<Vec<TypeStats>>;
}

/// Timestamp used for retention decisions
pub fn retention_timestamp(job: &Job) -> i64 {
    job.completed_at.unwrap_or(job.updated_at)
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::ExecutionOutcome;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory job store with the same CAS semantics as the SQLite adapter
    #[derive(Default)]
    pub struct InMemoryJobStore {
        jobs: Mutex<HashMap<JobId, Job>>,
        executions: Mutex<Vec<ExecutionRecord>>,
        archived_jobs: Mutex<Vec<Job>>,
        archived_executions: Mutex<Vec<ExecutionRecord>>,
        failing_saves: AtomicUsize,
    }

    impl InMemoryJobStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` save calls fail with a database error
        pub fn fail_next_saves(&self, n: usize) {
            self.failing_saves.store(n, Ordering::SeqCst);
        }

        /// Overwrite a row without a version check (test setup only)
        pub fn put(&self, job: Job) {
            self.jobs.lock().unwrap().insert(job.id.clone(), job);
        }

        pub fn get(&self, id: &str) -> Option<Job> {
            self.jobs.lock().unwrap().get(id).cloned()
        }

        pub fn executions_of(&self, job_id: &str) -> Vec<ExecutionRecord> {
            self.executions
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.job_id == job_id)
                .cloned()
                .collect()
        }

        pub fn archived_job_ids(&self) -> Vec<JobId> {
            self.archived_jobs
                .lock()
                .unwrap()
                .iter()
                .map(|j| j.id.clone())
                .collect()
        }

        fn take_injected_failure(&self) -> Result<()> {
            let injected = self
                .failing_saves
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if injected.is_ok() {
                return Err(AppError::Database("injected save failure".into()));
            }
            Ok(())
        }

        fn compare_and_swap(jobs: &mut HashMap<JobId, Job>, job: &Job) -> Result<Job> {
            let stored = jobs
                .get_mut(&job.id)
                .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;
            if stored.version != job.version {
                return Err(AppError::VersionConflict {
                    id: job.id.clone(),
                    expected: job.version,
                });
            }
            let mut saved = job.clone();
            saved.version += 1;
            *stored = saved.clone();
            Ok(saved)
        }

        fn sorted_ready(&self, now: i64, retry_only: bool, limit: i64) -> Vec<Job> {
            let jobs = self.jobs.lock().unwrap();
            let mut ready: Vec<Job> = jobs
                .values()
                .filter(|j| j.is_ready(now) && (!retry_only || j.attempts > 0))
                .cloned()
                .collect();
            ready.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.next_execution_at.cmp(&b.next_execution_at))
            });
            ready.truncate(limit.max(0) as usize);
            ready
        }

        fn compute_stats<'a>(
            jobs: impl Iterator<Item = &'a Job>,
            executions: impl Iterator<Item = &'a ExecutionRecord>,
        ) -> JobStats {
            let mut stats = JobStats::default();
            for job in jobs {
                stats.total_jobs += 1;
                *stats.by_status.entry(job.status).or_insert(0) += 1;
                if job.circuit_breaker_open {
                    stats.open_breakers += 1;
                }
            }
            let mut total_duration = 0i64;
            for record in executions {
                stats.executions += 1;
                total_duration += record.duration_ms;
                match record.outcome {
                    ExecutionOutcome::Success => stats.successes += 1,
                    ExecutionOutcome::Failure => stats.failures += 1,
                    ExecutionOutcome::Timeout => stats.timeouts += 1,
                }
            }
            if stats.executions > 0 {
                stats.avg_duration_ms = Some(total_duration as f64 / stats.executions as f64);
            }
            stats
        }
    }

    #[async_trait]
    impl JobStore for InMemoryJobStore {
        async fn insert(&self, job: &Job) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Conflict(format!("job {} already exists", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
            Ok(self.get(id))
        }

        async fn save(&self, job: &Job) -> Result<Job> {
            self.take_injected_failure()?;
            let mut jobs = self.jobs.lock().unwrap();
            Self::compare_and_swap(&mut jobs, job)
        }

        async fn save_with_record(&self, job: &Job, record: &ExecutionRecord) -> Result<Job> {
            self.take_injected_failure()?;
            let mut jobs = self.jobs.lock().unwrap();
            let saved = Self::compare_and_swap(&mut jobs, job)?;
            self.executions.lock().unwrap().push(record.clone());
            Ok(saved)
        }

        async fn delete(&self, id: &JobId, expected_version: i64) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get(id) {
                None => return Err(AppError::NotFound(format!("job {}", id))),
                Some(job) if job.version != expected_version => {
                    return Err(AppError::VersionConflict {
                        id: id.clone(),
                        expected: expected_version,
                    })
                }
                Some(_) => {}
            }
            jobs.remove(id);
            self.executions.lock().unwrap().retain(|r| &r.job_id != id);
            Ok(())
        }

        async fn find_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
            Ok(self.sorted_ready(now, false, limit))
        }

        async fn find_timed_out(&self, now: i64) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.values().filter(|j| j.is_timed_out(now)).cloned().collect())
        }

        async fn find_retry_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
            Ok(self.sorted_ready(now, true, limit))
        }

        async fn find_open_breakers(&self) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs
                .values()
                .filter(|j| j.circuit_breaker_open)
                .cloned()
                .collect())
        }

        async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
            let jobs = self.jobs.lock().unwrap();
            let mut found: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();
            found.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
            let offset = filter.offset.unwrap_or(0).max(0) as usize;
            let limit = filter.limit.map_or(usize::MAX, |l| l.max(0) as usize);
            Ok(found.into_iter().skip(offset).take(limit).collect())
        }

        async fn count(&self, filter: &JobFilter) -> Result<i64> {
            let jobs = self.jobs.lock().unwrap();
            Ok(jobs.values().filter(|j| filter.matches(j)).count() as i64)
        }

        async fn find_executions(
            &self,
            job_id: &JobId,
            limit: i64,
        ) -> Result<Vec<ExecutionRecord>> {
            let mut records = self.executions_of(job_id);
            records.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            records.truncate(limit.max(0) as usize);
            Ok(records)
        }

        async fn delete_older_than(&self, statuses: &[JobStatus], cutoff: i64) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let doomed: Vec<JobId> = jobs
                .values()
                .filter(|j| {
                    j.status.is_terminal()
                        && statuses.contains(&j.status)
                        && retention_timestamp(j) < cutoff
                })
                .map(|j| j.id.clone())
                .collect();
            for id in &doomed {
                jobs.remove(id);
            }
            self.executions
                .lock()
                .unwrap()
                .retain(|r| !doomed.contains(&r.job_id));
            Ok(doomed.len() as u64)
        }

        async fn archive_older_than(&self, cutoff: i64) -> Result<u64> {
            let mut jobs = self.jobs.lock().unwrap();
            let moved: Vec<Job> = jobs
                .values()
                .filter(|j| j.status.is_terminal() && retention_timestamp(j) < cutoff)
                .cloned()
                .collect();
            let mut executions = self.executions.lock().unwrap();
            for job in &moved {
                jobs.remove(&job.id);
                let (archived, kept): (Vec<_>, Vec<_>) =
                    executions.drain(..).partition(|r| r.job_id == job.id);
                *executions = kept;
                self.archived_executions.lock().unwrap().extend(archived);
            }
            let count = moved.len() as u64;
            self.archived_jobs.lock().unwrap().extend(moved);
            Ok(count)
        }

        async fn stats(&self, since: Option<i64>) -> Result<JobStats> {
            let since = since.unwrap_or(i64::MIN);
            let jobs = self.jobs.lock().unwrap();
            let executions = self.executions.lock().unwrap();
            Ok(Self::compute_stats(
                jobs.values().filter(|j| j.created_at >= since),
                executions.iter().filter(|r| r.started_at >= since),
            ))
        }

        async fn stats_by_type(&self, since: Option<i64>) -> Result<Vec<TypeStats>> {
            let since = since.unwrap_or(i64::MIN);
            let jobs = self.jobs.lock().unwrap();
            let executions = self.executions.lock().unwrap();
            let mut result = Vec::new();
            for job_type in JobType::ALL {
                let of_type: Vec<&Job> = jobs
                    .values()
                    .filter(|j| j.job_type == job_type && j.created_at >= since)
                    .collect();
                if of_type.is_empty() {
                    continue;
                }
                let stats = Self::compute_stats(
                    of_type.iter().copied(),
                    executions.iter().filter(|r| {
                        r.started_at >= since
                            && jobs.get(&r.job_id).is_some_and(|j| j.job_type == job_type)
                    }),
                );
                result.push(TypeStats { job_type, stats });
            }
            Ok(result)
        }
    }
}
