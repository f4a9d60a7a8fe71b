//! Shared harness: a full engine (store, orchestrator, sweeper, control) on a
//! SQLite file, driven by a manual clock.

#![allow(dead_code)]

use kairos_core::application::retry::FixedDelay;
use kairos_core::application::{
    CircuitBreaker, CircuitBreakerConfig, ControlService, CreateJobRequest, MaintenanceSweeper,
    Orchestrator, OrchestratorConfig, OutcomeResolver, SweeperConfig, TypeDispatcher,
};
use kairos_core::domain::{ExecutionRecord, Job, JobFamily, JobId, JobType, Schedule};
use kairos_core::port::id_provider::mocks::SequentialIdProvider;
use kairos_core::port::time_provider::mocks::ManualClock;
use kairos_core::port::{JobHandler, JobStore};
use kairos_infra_sqlite::{create_pool_at, run_migrations, SqliteJobStore, SqliteMaintenance};
use serde_json::json;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;
pub const MINUTE_MS: i64 = 60 * 1000;
pub const DAY_MS: i64 = 24 * 60 * MINUTE_MS;

pub struct EngineOptions {
    pub breaker_threshold: i32,
    pub retry_reclaimed_jobs: bool,
    /// Instance tag for generated ids, keeps two engines on one file apart
    pub instance: &'static str,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            breaker_threshold: 5,
            retry_reclaimed_jobs: false,
            instance: "a",
        }
    }
}

pub struct Engine {
    pub pool: SqlitePool,
    pub store: Arc<SqliteJobStore>,
    pub clock: Arc<ManualClock>,
    pub orchestrator: Arc<Orchestrator>,
    pub sweeper: Arc<MaintenanceSweeper>,
    pub control: Arc<ControlService>,
}

impl Engine {
    /// Open an engine on `path` that routes ETL and custom jobs to `handler`
    pub async fn open(
        path: &Path,
        clock: Arc<ManualClock>,
        handler: Arc<dyn JobHandler>,
        options: EngineOptions,
    ) -> Engine {
        let pool = create_pool_at(path).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let store = Arc::new(SqliteJobStore::new(pool.clone(), clock.clone()));
        let maintenance = Arc::new(SqliteMaintenance::new(pool.clone()));
        let ids = Arc::new(SequentialIdProvider::new(options.instance));

        let dispatcher = TypeDispatcher::new()
            .with_handler(JobFamily::Etl, handler.clone())
            .with_handler(JobFamily::Custom, handler);
        let resolver = OutcomeResolver::new(
            CircuitBreaker::new(CircuitBreakerConfig {
                threshold: options.breaker_threshold,
                cool_down: None,
            }),
            Arc::new(FixedDelay),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            dispatcher,
            resolver.clone(),
            ids.clone(),
            clock.clone(),
            OrchestratorConfig::default(),
        ));
        let sweeper = Arc::new(MaintenanceSweeper::new(
            store.clone(),
            maintenance.clone(),
            resolver,
            ids.clone(),
            clock.clone(),
            SweeperConfig {
                retry_reclaimed_jobs: options.retry_reclaimed_jobs,
                ..SweeperConfig::default()
            },
        ));
        let control = Arc::new(ControlService::new(
            store.clone(),
            orchestrator.clone(),
            sweeper.clone(),
            maintenance,
            ids,
            clock.clone(),
        ));

        Engine {
            pool,
            store,
            clock,
            orchestrator,
            sweeper,
            control,
        }
    }

    pub async fn job(&self, id: &JobId) -> Job {
        self.store.find_by_id(id).await.unwrap().unwrap()
    }

    pub async fn history(&self, id: &JobId) -> Vec<ExecutionRecord> {
        self.store.find_executions(id, 100).await.unwrap()
    }
}

/// Fresh database file inside a temp dir (kept alive by the returned guard)
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kairos.db");
    (dir, path)
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(T0))
}

/// ETL job due at T0, retry backoff of one second
pub fn etl_request(max_attempts: i32) -> CreateJobRequest {
    CreateJobRequest {
        name: "orders-sync".to_string(),
        group: "etl".to_string(),
        job_type: JobType::EtlDatabasePull,
        parameters: json!({"source": "postgres://orders", "destination": "warehouse"}),
        schedule: Schedule::once(T0),
        priority: None,
        max_attempts: Some(max_attempts),
        timeout_seconds: Some(60),
        backoff_delay_ms: Some(1_000),
        schedule_now: true,
    }
}

pub fn custom_request(name: &str, schedule: Schedule) -> CreateJobRequest {
    CreateJobRequest {
        name: name.to_string(),
        group: "ops".to_string(),
        job_type: JobType::Custom,
        parameters: json!({"command": "true"}),
        schedule,
        priority: None,
        max_attempts: None,
        timeout_seconds: None,
        backoff_delay_ms: None,
        schedule_now: true,
    }
}
