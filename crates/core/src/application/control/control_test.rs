//! Control service tests

use super::*;
use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::dispatcher::TypeDispatcher;
use crate::application::maintenance::SweeperConfig;
use crate::application::orchestrator::{
    DispatchOutcome, OrchestratorConfig, OutcomeResolver, Resolution,
};
use crate::application::retry::FixedDelay;
use crate::domain::{JobType, Schedule};
use crate::port::id_provider::mocks::SequentialIdProvider;
use crate::port::job_handler::mocks::{MockBehavior, ScriptedHandler};
use crate::port::job_store::mocks::InMemoryJobStore;
use crate::port::maintenance::mocks::StaticMaintenance;
use crate::port::time_provider::mocks::ManualClock;
use crate::port::JobHandler;
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

const NOW: i64 = 1_700_000_000_000;

struct Fixture {
    store: Arc<InMemoryJobStore>,
    maintenance: Arc<StaticMaintenance>,
    orchestrator: Arc<Orchestrator>,
    service: ControlService,
}

fn fixture_with(handler: Arc<dyn JobHandler>) -> Fixture {
    let store = Arc::new(InMemoryJobStore::new());
    let maintenance = Arc::new(StaticMaintenance::with_size_mb(1.0));
    let clock = Arc::new(ManualClock::new(NOW));
    let ids = Arc::new(SequentialIdProvider::new("job"));
    let resolver = OutcomeResolver::new(CircuitBreaker::default(), Arc::new(FixedDelay));

    let dispatcher = TypeDispatcher::new()
        .with_handler(JobFamily::Etl, handler.clone())
        .with_handler(JobFamily::Webhook, handler);
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
        SweeperConfig::default(),
    ));
    let service = ControlService::new(
        store.clone(),
        orchestrator.clone(),
        sweeper,
        maintenance.clone(),
        ids,
        clock,
    );

    Fixture {
        store,
        maintenance,
        orchestrator,
        service,
    }
}

fn fixture() -> Fixture {
    fixture_with(Arc::new(ScriptedHandler::succeeding()))
}

fn etl_request() -> CreateJobRequest {
    serde_json::from_value(json!({
        "name": "orders-pull",
        "group": "etl",
        "job_type": "ETL_DATABASE_PULL",
        "parameters": {"source": "postgres://orders", "destination": "warehouse.orders"},
        "schedule": {"kind": "ONCE", "at": NOW + 60_000},
        "max_attempts": 2,
        "timeout_seconds": 60
    }))
    .unwrap()
}

#[tokio::test]
async fn test_create_job_schedules_it() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    assert_eq!(job.id, "job-1");
    assert_eq!(job.status, JobStatus::Scheduled);
    assert_eq!(job.next_execution_at, Some(NOW + 60_000));
    assert_eq!(job.max_attempts, 2);
    assert_eq!(job.timeout_seconds, 60);
    assert_eq!(job.created_at, NOW);
    assert!(fx.store.get("job-1").is_some());
}

#[tokio::test]
async fn test_create_without_scheduling_stays_created() {
    let fx = fixture();
    let mut req = etl_request();
    req.schedule_now = false;

    let job = fx.service.create_job(req).await.unwrap();
    assert_eq!(job.status, JobStatus::Created);
    assert_eq!(job.next_execution_at, None);

    let scheduled = fx.service.schedule_job(&job.id).await.unwrap();
    assert_eq!(scheduled.status, JobStatus::Scheduled);
    assert_eq!(scheduled.next_execution_at, Some(NOW + 60_000));

    // Scheduling twice is an invalid transition
    assert!(matches!(
        fx.service.schedule_job(&job.id).await,
        Err(AppError::Domain(DomainError::InvalidStateTransition { .. }))
    ));
}

#[tokio::test]
async fn test_create_rejects_invalid_parameters() {
    let fx = fixture();
    let mut req = etl_request();
    req.parameters = json!({"source": "postgres://orders"});

    let err = fx.service.create_job(req).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Domain(DomainError::InvalidParameters { .. })
    ));
    assert_eq!(fx.store.count(&JobFilter::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_create_rejects_type_without_handler() {
    let fx = fixture();
    let mut req = etl_request();
    req.job_type = JobType::ReportGeneration;
    req.parameters = json!({"report": "sales"});

    let err = fx.service.create_job(req).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Domain(DomainError::UnsupportedJobType(_))
    ));
}

#[tokio::test]
async fn test_create_rejects_out_of_range_fields() {
    let fx = fixture();

    let mut req = etl_request();
    req.priority = Some(500);
    assert_err!(fx.service.create_job(req).await);

    let mut req = etl_request();
    req.timeout_seconds = Some(DEFAULT_MAX_JOB_TIMEOUT_SECS + 1);
    assert!(matches!(
        fx.service.create_job(req).await,
        Err(AppError::Validation(_))
    ));

    let mut req = etl_request();
    req.schedule = Schedule::cron("every tuesday");
    assert!(matches!(
        fx.service.create_job(req).await,
        Err(AppError::Domain(DomainError::InvalidSchedule(_)))
    ));

    let mut req = etl_request();
    req.schedule = Schedule::every(10_000_000_000_000_000);
    assert!(matches!(
        fx.service.create_job(req).await,
        Err(AppError::Domain(DomainError::InvalidSchedule(_)))
    ));
}

#[tokio::test]
async fn test_get_missing_job_is_not_found() {
    let fx = fixture();
    assert!(matches!(
        fx.service.get_job(&"nope".to_string()).await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_and_count_with_filters() {
    let fx = fixture();
    fx.service.create_job(etl_request()).await.unwrap();
    let mut other = etl_request();
    other.name = "customers-pull".into();
    other.group = "crm".into();
    fx.service.create_job(other).await.unwrap();

    let filter = JobFilter {
        group: Some("crm".into()),
        ..Default::default()
    };
    let jobs = fx.service.list_jobs(filter.clone()).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].name, "customers-pull");
    assert_eq!(fx.service.count_jobs(filter).await.unwrap(), 1);

    let by_name = JobFilter {
        name: Some("pull".into()),
        ..Default::default()
    };
    assert_eq!(fx.service.count_jobs(by_name).await.unwrap(), 2);
}

#[tokio::test]
async fn test_update_reschedules_and_bumps_version() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    let patch = UpdateJobRequest {
        priority: Some(80),
        schedule: Some(Schedule::every(300)),
        ..Default::default()
    };
    let updated = fx.service.update_job(&job.id, patch).await.unwrap();

    assert_eq!(updated.priority, 80);
    assert_eq!(updated.next_execution_at, Some(NOW + 300_000));
    assert_eq!(updated.version, job.version + 1);
}

#[tokio::test]
async fn test_update_rejects_empty_patch_and_running_job() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    assert!(matches!(
        fx.service
            .update_job(&job.id, UpdateJobRequest::default())
            .await,
        Err(AppError::Validation(_))
    ));

    let mut running = fx.store.get(&job.id).unwrap();
    running.begin_attempt(NOW).unwrap();
    fx.store.put(running);

    let patch = UpdateJobRequest {
        name: Some("renamed".into()),
        ..Default::default()
    };
    assert!(matches!(
        fx.service.update_job(&job.id, patch).await,
        Err(AppError::Conflict(_))
    ));
}

#[tokio::test]
async fn test_update_cannot_shrink_attempt_budget_below_used() {
    let handler = Arc::new(ScriptedHandler::failing("source unreachable"));
    let fx = fixture_with(handler.clone());
    let mut req = etl_request();
    req.max_attempts = Some(3);
    let job = fx.service.create_job(req).await.unwrap();

    fx.orchestrator.on_due(&job.id).await;
    fx.orchestrator.on_due(&job.id).await;
    let retrying = fx.store.get(&job.id).unwrap();
    assert_eq!(retrying.status, JobStatus::Scheduled);
    assert_eq!(retrying.attempts, 2);

    for max_attempts in [1, 2] {
        let patch = UpdateJobRequest {
            max_attempts: Some(max_attempts),
            ..Default::default()
        };
        assert!(matches!(
            fx.service.update_job(&job.id, patch).await,
            Err(AppError::Validation(_))
        ));
    }
    assert_eq!(fx.store.get(&job.id).unwrap().max_attempts, 3);

    // A row whose budget is already spent fails without another attempt
    let mut spent = fx.store.get(&job.id).unwrap();
    spent.max_attempts = 2;
    fx.store.put(spent);

    let outcome = fx.orchestrator.on_due(&job.id).await;
    assert_eq!(
        outcome,
        DispatchOutcome::Finished {
            resolution: Resolution::Failed
        }
    );
    let failed = fx.store.get(&job.id).unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.attempts, 2);
    assert_eq!(failed.active_executions, 0);
    assert_eq!(fx.store.executions_of(&job.id).len(), 2);
    assert_eq!(handler.call_count(), 2);
}

#[tokio::test]
async fn test_delete_refuses_running_job() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    let mut running = fx.store.get(&job.id).unwrap();
    running.begin_attempt(NOW).unwrap();
    fx.store.put(running);
    assert!(matches!(
        fx.service.delete_job(&job.id).await,
        Err(AppError::Conflict(_))
    ));

    let other = fx.service.create_job(etl_request()).await.unwrap();
    fx.service.delete_job(&other.id).await.unwrap();
    assert!(fx.store.get(&other.id).is_none());
}

#[tokio::test]
async fn test_cancel_scheduled_job_is_immediate() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    let cancelled = assert_ok!(fx.service.cancel_job(&job.id).await);
    assert_eq!(cancelled.status, JobStatus::Cancelled);
    assert_eq!(cancelled.next_execution_at, None);

    // Terminal jobs cannot be cancelled again
    assert_err!(fx.service.cancel_job(&job.id).await);
}

#[tokio::test]
async fn test_cancel_running_job_marks_intent() {
    let fx = fixture_with(Arc::new(ScriptedHandler::new(MockBehavior::WaitForCancel)));
    let job = fx.service.create_job(etl_request()).await.unwrap();

    let orchestrator = fx.orchestrator.clone();
    let id = job.id.clone();
    let task = tokio::spawn(async move { orchestrator.on_due(&id).await });
    while fx.orchestrator.in_flight_count() == 0 {
        tokio::task::yield_now().await;
    }

    let marked = fx.service.cancel_job(&job.id).await.unwrap();
    assert_eq!(marked.status, JobStatus::Running);
    assert!(marked.cancel_requested);

    task.await.unwrap();
    let stored = fx.store.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert!(fx.store.executions_of(&job.id).is_empty());
}

#[tokio::test]
async fn test_execute_now_runs_job_in_background() {
    let fx = fixture();
    let job = fx.service.create_job(etl_request()).await.unwrap();

    let prepared = fx.service.execute_now(&job.id).await.unwrap();
    assert_eq!(prepared.next_execution_at, Some(NOW));

    while fx.store.get(&job.id).unwrap().status != JobStatus::Completed {
        tokio::task::yield_now().await;
    }
    let history = fx.service.job_history(&job.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_ready_and_retry_ready_queries() {
    let fx = fixture();
    let mut req = etl_request();
    req.schedule = Schedule::once(NOW - 1);
    let due = fx.service.create_job(req).await.unwrap();
    fx.service.create_job(etl_request()).await.unwrap(); // not yet due

    let ready = fx.service.list_ready(None).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].id, due.id);
    assert!(fx.service.list_retry_ready(None).await.unwrap().is_empty());

    let mut retried = fx.store.get(&due.id).unwrap();
    retried.attempts = 1;
    fx.store.put(retried);
    assert_eq!(fx.service.list_retry_ready(Some(10)).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_stats_count_jobs_and_executions() {
    let fx = fixture();
    let mut req = etl_request();
    req.schedule = Schedule::once(NOW - 1);
    let job = fx.service.create_job(req).await.unwrap();
    fx.orchestrator.on_due(&job.id).await;

    let stats = fx.service.stats_overall(None).await.unwrap();
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.executions, 1);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.by_status.get(&JobStatus::Completed), Some(&1));

    let by_type = fx.service.stats_by_type(None).await.unwrap();
    assert_eq!(by_type.len(), 1);
    assert_eq!(by_type[0].job_type, JobType::EtlDatabasePull);

    let future = fx.service.stats_overall(Some(NOW + 1)).await.unwrap();
    assert_eq!(future.total_jobs, 0);
}

#[tokio::test]
async fn test_health_reports_store_state() {
    let fx = fixture();
    let report = fx.service.health().await;
    assert!(report.healthy);
    assert!(report.storage.is_some());
    assert_eq!(
        report.registered_families,
        vec![JobFamily::Etl, JobFamily::Webhook]
    );

    fx.maintenance.set_unreachable(true);
    let report = fx.service.health().await;
    assert!(!report.healthy);
    assert!(report.storage.is_none());
}
