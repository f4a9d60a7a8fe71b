// Execution Orchestrator - drives a due job through one attempt

mod outcome;

pub use outcome::{AttemptResult, OutcomeResolver, Resolution};

use crate::application::constants::{
    DEFAULT_EXECUTION_CEILING, DEFAULT_MAX_CONCURRENT_EXECUTIONS, DEFAULT_TIMEOUT_GRACE,
    FINALIZE_MAX_RETRIES,
};
use crate::application::dispatcher::TypeDispatcher;
use crate::domain::{DomainError, ExecutionRecord, Job, JobId, JobStatus};
use crate::error::{AppError, Result};
use crate::port::{ExecutionContext, HandlerError, IdProvider, JobHandler, JobStore, TimeProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Size of the handler worker pool
    pub max_concurrent_executions: usize,
    /// Hard bound on any handler call, above every job's own timeout
    pub execution_ceiling: Duration,
    /// Wait after a job timeout cancels the handler before dropping it
    pub timeout_grace: Duration,
    /// Re-reads allowed when finalization loses a version check
    pub finalize_max_retries: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            execution_ceiling: DEFAULT_EXECUTION_CEILING,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            finalize_max_retries: FINALIZE_MAX_RETRIES,
        }
    }
}

/// What happened to one due signal. Signals never produce errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchOutcome {
    /// Job no longer exists
    NotFound,
    /// Job is not SCHEDULED
    NotExecutable { status: JobStatus },
    /// Breaker open, signal consumed without an attempt
    CircuitOpen,
    /// Another instance claimed the job first
    LostRace,
    /// Attempt ran and the job moved on
    Finished { resolution: Resolution },
    /// Attempt ran but the row had been reclaimed or deleted meanwhile
    Superseded,
    /// Store failed; the sweeper reconciles the row later
    PersistenceFailed,
    /// Orchestrator is shutting down
    ShuttingDown,
}

/// Execution Orchestrator
///
/// The claim (SCHEDULED -> RUNNING) is a compare-and-swap on the job version,
/// so any number of orchestrators may share one store.
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    dispatcher: TypeDispatcher,
    resolver: OutcomeResolver,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    config: OrchestratorConfig,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashMap<JobId, CancellationToken>>,
    detached: AtomicU64,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: TypeDispatcher,
        resolver: OutcomeResolver,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_executions.max(1)));
        Self {
            store,
            dispatcher,
            resolver,
            id_provider,
            time_provider,
            config,
            permits,
            in_flight: Mutex::new(HashMap::new()),
            detached: AtomicU64::new(0),
        }
    }

    pub fn dispatcher(&self) -> &TypeDispatcher {
        &self.dispatcher
    }

    /// Handle a "job is due" signal (at-least-once delivery)
    pub async fn on_due(&self, id: &JobId) -> DispatchOutcome {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return DispatchOutcome::ShuttingDown;
        };
        self.dispatch(id, permit).await
    }

    /// Claim up to `limit` ready jobs and run each on the worker pool
    ///
    /// Only as many jobs as there are free permits are fetched, so a poll
    /// never queues work behind a busy pool.
    pub async fn poll_ready(self: &Arc<Self>, limit: i64) -> Result<Vec<JoinHandle<DispatchOutcome>>> {
        let available = self.permits.available_permits() as i64;
        if available == 0 || self.permits.is_closed() {
            return Ok(Vec::new());
        }

        let now = self.time_provider.now_millis();
        let ready = self.store.find_ready(now, limit.min(available)).await?;

        let mut handles = Vec::with_capacity(ready.len());
        for job in ready {
            let Ok(permit) = self.permits.clone().try_acquire_owned() else {
                break;
            };
            let orchestrator = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                orchestrator.dispatch(&job.id, permit).await
            }));
        }

        if !handles.is_empty() {
            debug!(dispatched = handles.len(), "Dispatched ready jobs");
        }
        Ok(handles)
    }

    /// Make a job due now (CREATED jobs are scheduled first)
    ///
    /// The caller then delivers the due signal through [`Orchestrator::on_due`].
    pub async fn prepare_immediate(&self, id: &JobId) -> Result<Job> {
        let mut job = self
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;

        if job.circuit_breaker_open {
            return Err(DomainError::CircuitBreakerOpen(id.clone()).into());
        }

        let now = self.time_provider.now_millis();
        match job.status {
            JobStatus::Created => job.schedule(now, now)?,
            JobStatus::Scheduled => {
                job.next_execution_at = Some(now);
                job.updated_at = now;
            }
            status => {
                return Err(DomainError::JobNotExecutable {
                    id: id.clone(),
                    status: status.to_string(),
                }
                .into())
            }
        }

        self.store.save(&job).await
    }

    /// Fire the cancellation token of an in-flight execution
    ///
    /// # Returns
    /// true if this instance is running the job
    pub fn signal_cancel(&self, id: &JobId) -> bool {
        match self.in_flight.lock() {
            Ok(in_flight) => match in_flight.get(id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Executions abandoned at the fail-safe ceiling
    pub fn detached_count(&self) -> u64 {
        self.detached.load(Ordering::SeqCst)
    }

    /// Stop accepting new executions; in-flight ones run to completion
    pub fn close(&self) {
        self.permits.close();
    }

    async fn dispatch(&self, id: &JobId, _permit: OwnedSemaphorePermit) -> DispatchOutcome {
        // 1. Load (signals may reference deleted jobs)
        let job = match self.store.find_by_id(id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id = %id, "Due signal for unknown job ignored");
                return DispatchOutcome::NotFound;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to load due job");
                return DispatchOutcome::PersistenceFailed;
            }
        };

        // 2-3. Verify and claim
        let claimed = match self.claim(job).await {
            Ok(claimed) => claimed,
            Err(outcome) => return outcome,
        };
        let token = CancellationToken::new();
        self.register(id, token.clone());

        info!(
            job_id = %claimed.id,
            job_type = %claimed.job_type,
            attempt = claimed.attempts,
            "Job started"
        );

        // 4. Dispatch under deadline
        let (result, allow_retry) = match self.dispatcher.resolve(claimed.job_type) {
            Ok(handler) => (self.execute(&claimed, handler, token).await, true),
            Err(e) => {
                error!(job_id = %claimed.id, error = %e, "No handler registered for job type");
                (AttemptResult::Failed(e.to_string()), false)
            }
        };

        // 5-7. Record outcome
        let outcome = self.finalize(&claimed, result, allow_retry).await;
        self.unregister(id);
        outcome
    }

    async fn claim(&self, job: Job) -> std::result::Result<Job, DispatchOutcome> {
        let now = self.time_provider.now_millis();
        let mut claimed = job;

        if let Err(e) = claimed.begin_attempt(now) {
            return Err(match e {
                DomainError::AttemptsExhausted { .. } => self.retire_exhausted(claimed, now).await,
                DomainError::CircuitBreakerOpen(_) => {
                    info!(job_id = %claimed.id, "Circuit breaker open, due signal consumed");
                    DispatchOutcome::CircuitOpen
                }
                other => {
                    info!(job_id = %claimed.id, status = %claimed.status, reason = %other, "Job not executable");
                    DispatchOutcome::NotExecutable {
                        status: claimed.status,
                    }
                }
            });
        }

        match self.store.save(&claimed).await {
            Ok(saved) => Ok(saved),
            Err(AppError::VersionConflict { .. }) | Err(AppError::NotFound(_)) => {
                debug!(job_id = %claimed.id, "Lost claim race");
                Err(DispatchOutcome::LostRace)
            }
            Err(e) => {
                error!(job_id = %claimed.id, error = %e, "Failed to persist claim");
                Err(DispatchOutcome::PersistenceFailed)
            }
        }
    }

    /// A SCHEDULED job with no attempts left fails without running again
    async fn retire_exhausted(&self, mut job: Job, now: i64) -> DispatchOutcome {
        if let Err(e) = job.fail_exhausted(now) {
            warn!(job_id = %job.id, error = %e, "Could not retire exhausted job");
            return DispatchOutcome::NotExecutable { status: job.status };
        }
        match self.store.save(&job).await {
            Ok(saved) => {
                warn!(
                    job_id = %saved.id,
                    attempts = saved.attempts,
                    max_attempts = saved.max_attempts,
                    "Attempt budget already spent, job failed without dispatch"
                );
                DispatchOutcome::Finished {
                    resolution: Resolution::Failed,
                }
            }
            Err(AppError::VersionConflict { .. }) | Err(AppError::NotFound(_)) => {
                DispatchOutcome::LostRace
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to persist exhausted job");
                DispatchOutcome::PersistenceFailed
            }
        }
    }

    /// Run the handler on its own task: panics stay inside the task, the job
    /// timeout is applied inside it and the fail-safe ceiling outside it.
    /// On job timeout the token fires first and the handler gets
    /// `timeout_grace` to wind down before it is dropped.
    async fn execute(
        &self,
        job: &Job,
        handler: Arc<dyn JobHandler>,
        token: CancellationToken,
    ) -> AttemptResult {
        let ceiling = self.config.execution_ceiling;
        let job_timeout = Duration::from_secs(job.timeout_seconds.max(1) as u64);

        let ctx = ExecutionContext {
            job_id: job.id.clone(),
            job_type: job.job_type,
            attempt: job.attempts,
            deadline_at: job.started_at.unwrap_or_default() + job_timeout.min(ceiling).as_millis() as i64,
            cancellation: token.clone(),
        };
        let params = job.parameters.clone();

        let grace = self.config.timeout_grace;
        let mut handle = tokio::spawn(async move {
            let run = handler.execute(&ctx, &params);
            tokio::pin!(run);
            match tokio::time::timeout(job_timeout, &mut run).await {
                Ok(result) => Ok(result),
                Err(elapsed) => {
                    ctx.cancellation.cancel();
                    if tokio::time::timeout(grace, &mut run).await.is_err() {
                        warn!(job_id = %ctx.job_id, "Handler ignored cancellation after timeout");
                    }
                    Err(elapsed)
                }
            }
        });

        match tokio::time::timeout(ceiling, &mut handle).await {
            Ok(Ok(Ok(Ok(output)))) => AttemptResult::Succeeded {
                summary: output.summary,
            },
            Ok(Ok(Ok(Err(HandlerError::Cancelled)))) => {
                AttemptResult::Failed("Execution cancelled".to_string())
            }
            Ok(Ok(Ok(Err(e)))) => AttemptResult::Failed(e.to_string()),
            Ok(Ok(Err(_elapsed))) => {
                token.cancel();
                warn!(job_id = %job.id, timeout_secs = job_timeout.as_secs(), "Job timed out");
                AttemptResult::TimedOut(format!(
                    "Execution exceeded timeout of {}s",
                    job_timeout.as_secs()
                ))
            }
            Ok(Err(join_err)) => {
                let msg = if join_err.is_panic() {
                    format!("Handler panicked: {}", panic_message(join_err))
                } else {
                    "Handler task aborted".to_string()
                };
                error!(job_id = %job.id, error = %msg, "Handler task failed");
                AttemptResult::Failed(msg)
            }
            Err(_) => {
                token.cancel();
                handle.abort();
                let detached = self.detached.fetch_add(1, Ordering::SeqCst) + 1;
                error!(
                    job_id = %job.id,
                    ceiling_secs = ceiling.as_secs(),
                    detached,
                    "Handler exceeded fail-safe ceiling, detached"
                );
                AttemptResult::TimedOut(format!(
                    "Execution exceeded fail-safe ceiling of {}s",
                    ceiling.as_secs()
                ))
            }
        }
    }

    /// Persist the outcome. On a version conflict the row is re-read and the
    /// write retried while it still belongs to this execution.
    async fn finalize(&self, claimed: &Job, result: AttemptResult, allow_retry: bool) -> DispatchOutcome {
        let finished_at = self.time_provider.now_millis();
        let mut current = claimed.clone();

        for _ in 0..=self.config.finalize_max_retries {
            let mut next = current.clone();
            let resolution = match self.resolver.resolve(&mut next, &result, finished_at, allow_retry) {
                Ok(resolution) => resolution,
                Err(e) => {
                    error!(job_id = %claimed.id, error = %e, "Cannot apply attempt outcome");
                    return DispatchOutcome::Superseded;
                }
            };

            let write = if resolution.writes_record() {
                let record = ExecutionRecord::new(
                    self.id_provider.generate_id(),
                    claimed.id.clone(),
                    claimed.attempts,
                    claimed.started_at.unwrap_or(finished_at),
                    finished_at,
                    result.outcome(),
                    result.error_message(),
                );
                self.store.save_with_record(&next, &record).await
            } else {
                self.store.save(&next).await
            };

            match write {
                Ok(saved) => {
                    info!(
                        job_id = %saved.id,
                        attempt = claimed.attempts,
                        outcome = %result.outcome(),
                        status = %saved.status,
                        duration_ms = finished_at - claimed.started_at.unwrap_or(finished_at),
                        "Job attempt finished"
                    );
                    return DispatchOutcome::Finished { resolution };
                }
                Err(AppError::VersionConflict { .. }) => match self.store.find_by_id(&claimed.id).await {
                    Ok(Some(fresh)) if same_execution(claimed, &fresh) => {
                        debug!(job_id = %claimed.id, "Row changed during execution, re-applying outcome");
                        current = fresh;
                    }
                    Ok(_) => {
                        warn!(job_id = %claimed.id, "Execution was reclaimed elsewhere, dropping late result");
                        return DispatchOutcome::Superseded;
                    }
                    Err(e) => {
                        error!(job_id = %claimed.id, error = %e, "Failed to reload job after conflict");
                        return DispatchOutcome::PersistenceFailed;
                    }
                },
                Err(AppError::NotFound(_)) => {
                    warn!(job_id = %claimed.id, "Job deleted during execution");
                    return DispatchOutcome::Superseded;
                }
                Err(e) => {
                    error!(
                        job_id = %claimed.id,
                        error = %e,
                        "Failed to persist attempt outcome, left for the sweeper"
                    );
                    return DispatchOutcome::PersistenceFailed;
                }
            }
        }

        error!(job_id = %claimed.id, "Gave up persisting attempt outcome after repeated conflicts");
        DispatchOutcome::PersistenceFailed
    }

    fn register(&self, id: &JobId, token: CancellationToken) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(id.clone(), token);
        }
    }

    fn unregister(&self, id: &JobId) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(id);
        }
    }
}

/// The stored row still describes the attempt we claimed
fn same_execution(claimed: &Job, fresh: &Job) -> bool {
    fresh.status == JobStatus::Running
        && fresh.attempts == claimed.attempts
        && fresh.started_at == claimed.started_at
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
