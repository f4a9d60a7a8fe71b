// Trigger loop - polls the store for due jobs and signals the orchestrator

use crate::application::constants::{
    DEFAULT_POLL_BATCH_SIZE, DEFAULT_POLL_INTERVAL, ERROR_RECOVERY_SLEEP_DURATION,
};
use crate::application::orchestrator::Orchestrator;
use crate::application::shutdown::ShutdownToken;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            batch_size: DEFAULT_POLL_BATCH_SIZE,
        }
    }
}

/// Readiness poller
///
/// Delivery is at-least-once: a job seen by two polls (or two instances) is
/// claimed by exactly one orchestrator, the rest observe a lost race.
pub struct TriggerLoop {
    orchestrator: Arc<Orchestrator>,
    config: TriggerConfig,
}

impl TriggerLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, config: TriggerConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run until shutdown, then close the orchestrator to new work
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Trigger loop started"
        );

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let pause = match self.orchestrator.poll_ready(self.config.batch_size).await {
                // A full batch means more work may be waiting
                Ok(handles) if handles.len() as i64 >= self.config.batch_size => Duration::ZERO,
                Ok(_) => self.config.poll_interval,
                Err(e) => {
                    error!(error = %e, "Readiness poll failed");
                    ERROR_RECOVERY_SLEEP_DURATION
                }
            };

            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => {
                    info!("Trigger loop interrupted");
                    break;
                }
            }
        }

        self.orchestrator.close();
        info!(in_flight = self.orchestrator.in_flight_count(), "Trigger loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::circuit_breaker::CircuitBreaker;
    use crate::application::dispatcher::TypeDispatcher;
    use crate::application::orchestrator::{OrchestratorConfig, OutcomeResolver};
    use crate::application::retry::FixedDelay;
    use crate::application::shutdown::shutdown_channel;
    use crate::domain::{Job, JobFamily, JobParameters, JobStatus, JobType, Schedule};
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_handler::mocks::ScriptedHandler;
    use crate::port::job_store::mocks::InMemoryJobStore;
    use crate::port::time_provider::mocks::ManualClock;
    use crate::port::JobStore;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_due_jobs_until_shutdown() {
        let store = Arc::new(InMemoryJobStore::new());
        let handler = Arc::new(ScriptedHandler::succeeding());
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            TypeDispatcher::new().with_handler(JobFamily::Report, handler.clone()),
            OutcomeResolver::new(CircuitBreaker::default(), Arc::new(FixedDelay)),
            Arc::new(SequentialIdProvider::new("exec")),
            Arc::new(ManualClock::new(5_000)),
            OrchestratorConfig::default(),
        ));

        let params =
            JobParameters::parse(JobType::ReportGeneration, json!({"report": "daily-sales"})).unwrap();
        let mut job = Job::new_test(JobType::ReportGeneration, params, Schedule::once(1_000));
        job.schedule(1_000, 1_000).unwrap();
        store.insert(&job).await.unwrap();

        let (tx, token) = shutdown_channel();
        let trigger = TriggerLoop::new(orchestrator.clone(), TriggerConfig::default());
        let running = tokio::spawn(async move { trigger.run(token).await });

        while store.get(&job.id).unwrap().status != JobStatus::Completed {
            sleep(Duration::from_millis(100)).await;
        }
        tx.shutdown();
        running.await.unwrap();

        assert_eq!(handler.call_count(), 1);
        assert!(orchestrator.poll_ready(10).await.unwrap().is_empty());
    }
}
