// SQLite JobStore Implementation

use async_trait::async_trait;
use kairos_core::domain::{
    ExecutionOutcome, ExecutionRecord, Job, JobId, JobParameters, JobStatus, JobType, Schedule,
};
use kairos_core::error::{AppError, Result};
use kairos_core::port::{JobFilter, JobStats, JobStore, TimeProvider, TypeStats};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info};

// Column order shared by `jobs` and `jobs_archive`
const JOB_COLUMNS: &str = "id, name, job_group, job_type, status, priority, parameters, schedule, \
     attempts, max_attempts, backoff_delay_ms, timeout_seconds, active_executions, \
     cancel_requested, last_error, consecutive_failures, circuit_breaker_open, \
     breaker_opened_at, started_at, completed_at, next_execution_at, created_at, updated_at, \
     version";

const EXECUTION_COLUMNS: &str =
    "id, job_id, attempt, started_at, finished_at, outcome, duration_ms, error_message";

// Helper to convert sqlx::Error to AppError with structured information
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => {
                        // UNIQUE / PRIMARY KEY constraint failed
                        AppError::Conflict(format!(
                            "Unique constraint violation: {} ({})",
                            db_err.message(),
                            code_str
                        ))
                    }
                    "787" | "3850" => AppError::Database(format!(
                        "Foreign key constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

/// `status IN (...)` over the terminal statuses. Values are static, never user input.
fn terminal_status_list() -> String {
    JobStatus::TERMINAL
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(name) = &filter.name {
        qb.push(" AND name LIKE ")
            .push_bind(format!("%{}%", escape_like(name)))
            .push(" ESCAPE '\\'");
    }
    if let Some(group) = &filter.group {
        qb.push(" AND job_group = ").push_bind(group.clone());
    }
    if let Some(job_type) = filter.job_type {
        qb.push(" AND job_type = ").push_bind(job_type.as_str());
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(priority) = filter.priority {
        qb.push(" AND priority = ").push_bind(priority);
    }
    if let Some(since) = filter.created_since {
        qb.push(" AND created_at >= ").push_bind(since);
    }
}

/// Retention predicate shared by delete and archive
fn push_expired(qb: &mut QueryBuilder<'_, Sqlite>, statuses: &[JobStatus], cutoff: i64) {
    qb.push(" status IN (");
    let mut separated = qb.separated(", ");
    for status in statuses {
        separated.push_bind(status.as_str());
    }
    separated.push_unseparated(")");
    qb.push(" AND COALESCE(completed_at, updated_at) < ")
        .push_bind(cutoff);
}

pub struct SqliteJobStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `UPDATE ... WHERE id = ? AND version = ?`, returns rows affected
    async fn compare_and_swap<'c, E>(executor: E, job: &Job) -> Result<u64>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let parameters = serde_json::to_string(&job.parameters)?;
        let schedule = serde_json::to_string(&job.schedule)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs SET
                name = ?, job_group = ?, status = ?, priority = ?,
                parameters = ?, schedule = ?,
                attempts = ?, max_attempts = ?, backoff_delay_ms = ?,
                timeout_seconds = ?, active_executions = ?, cancel_requested = ?, last_error = ?,
                consecutive_failures = ?, circuit_breaker_open = ?, breaker_opened_at = ?,
                started_at = ?, completed_at = ?, next_execution_at = ?, updated_at = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(&job.name)
        .bind(&job.group)
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&parameters)
        .bind(&schedule)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_delay_ms)
        .bind(job.timeout_seconds)
        .bind(job.active_executions)
        .bind(job.cancel_requested)
        .bind(&job.last_error)
        .bind(job.consecutive_failures)
        .bind(job.circuit_breaker_open)
        .bind(job.breaker_opened_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.next_execution_at)
        .bind(job.updated_at)
        .bind(&job.id)
        .bind(job.version)
        .execute(executor)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    /// Tell a lost CAS apart: row changed vs row gone
    async fn lost_write<'c, E>(executor: E, id: &JobId, expected: i64) -> AppError
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let exists: std::result::Result<i64, sqlx::Error> =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE id = ?")
                .bind(id)
                .fetch_one(executor)
                .await;

        match exists {
            Ok(0) => AppError::NotFound(format!("job {}", id)),
            Ok(_) => AppError::VersionConflict {
                id: id.clone(),
                expected,
            },
            Err(e) => map_sqlx_error(e),
        }
    }

    async fn ready(&self, now: i64, limit: i64, retry_only: bool) -> Result<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT * FROM jobs
            WHERE status = ? AND circuit_breaker_open = 0
              AND next_execution_at IS NOT NULL AND next_execution_at <= ?
              {}
            ORDER BY priority DESC, next_execution_at ASC
            LIMIT ?
            "#,
            if retry_only { "AND attempts > 0" } else { "" }
        );

        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(JobStatus::Scheduled.as_str())
            .bind(now)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    /// Counters for one job type, or for every job when `job_type` is None
    async fn collect_stats(&self, job_type: Option<JobType>, since: i64) -> Result<JobStats> {
        let type_name = job_type.map(|t| t.as_str());

        let by_status: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*) FROM jobs
            WHERE created_at >= ? AND (? IS NULL OR job_type = ?)
            GROUP BY status
            "#,
        )
        .bind(since)
        .bind(type_name)
        .bind(type_name)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let open_breakers: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM jobs
            WHERE created_at >= ? AND (? IS NULL OR job_type = ?) AND circuit_breaker_open = 1
            "#,
        )
        .bind(since)
        .bind(type_name)
        .bind(type_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let (executions, successes, failures, timeouts, avg_duration_ms): (
            i64,
            i64,
            i64,
            i64,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN e.outcome = 'SUCCESS' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN e.outcome = 'FAILURE' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN e.outcome = 'TIMEOUT' THEN 1 ELSE 0 END), 0),
                AVG(e.duration_ms)
            FROM job_executions e
            JOIN jobs j ON j.id = e.job_id
            WHERE e.started_at >= ? AND (? IS NULL OR j.job_type = ?)
            "#,
        )
        .bind(since)
        .bind(type_name)
        .bind(type_name)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut stats = JobStats {
            open_breakers,
            executions,
            successes,
            failures,
            timeouts,
            avg_duration_ms,
            ..Default::default()
        };
        for (status, count) in by_status {
            let status: JobStatus = status.parse().map_err(|e| corrupt("status", &status, e))?;
            stats.total_jobs += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> Result<()> {
        let parameters = serde_json::to_string(&job.parameters)?;
        let schedule = serde_json::to_string(&job.schedule)?;

        sqlx::query(&format!(
            "INSERT INTO jobs ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            JOB_COLUMNS
        ))
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.group)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(&parameters)
        .bind(&schedule)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.backoff_delay_ms)
        .bind(job.timeout_seconds)
        .bind(job.active_executions)
        .bind(job.cancel_requested)
        .bind(&job.last_error)
        .bind(job.consecutive_failures)
        .bind(job.circuit_breaker_open)
        .bind(job.breaker_opened_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.next_execution_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(job_id = %job.id, job_type = %job.job_type, "Job inserted");
        Ok(())
    }

    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn save(&self, job: &Job) -> Result<Job> {
        if Self::compare_and_swap(&self.pool, job).await? == 0 {
            return Err(Self::lost_write(&self.pool, &job.id, job.version).await);
        }

        let mut saved = job.clone();
        saved.version += 1;
        Ok(saved)
    }

    async fn save_with_record(&self, job: &Job, record: &ExecutionRecord) -> Result<Job> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        if Self::compare_and_swap(&mut *tx, job).await? == 0 {
            let err = Self::lost_write(&mut *tx, &job.id, job.version).await;
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(err);
        }

        sqlx::query(&format!(
            "INSERT INTO job_executions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            EXECUTION_COLUMNS
        ))
        .bind(&record.id)
        .bind(&record.job_id)
        .bind(record.attempt)
        .bind(record.started_at)
        .bind(record.finished_at)
        .bind(record.outcome.as_str())
        .bind(record.duration_ms)
        .bind(&record.error_message)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        let mut saved = job.clone();
        saved.version += 1;
        Ok(saved)
    }

    async fn delete(&self, id: &JobId, expected_version: i64) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let result = sqlx::query("DELETE FROM jobs WHERE id = ? AND version = ?")
            .bind(id)
            .bind(expected_version)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            let err = Self::lost_write(&mut *tx, id, expected_version).await;
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Err(err);
        }

        // Cascades as well; explicit so history never outlives its job
        sqlx::query("DELETE FROM job_executions WHERE job_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn find_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
        self.ready(now, limit, false).await
    }

    async fn find_timed_out(&self, now: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE status = ? AND started_at IS NOT NULL
              AND started_at + timeout_seconds * 1000 < ?
            ORDER BY started_at ASC
            "#,
        )
        .bind(JobStatus::Running.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_retry_ready(&self, now: i64, limit: i64) -> Result<Vec<Job>> {
        self.ready(now, limit, true).await
    }

    async fn find_open_breakers(&self) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM jobs WHERE circuit_breaker_open = 1 ORDER BY breaker_opened_at ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM jobs");
        push_filter(&mut qb, filter);
        // SQLite needs a LIMIT before OFFSET; -1 means unbounded
        qb.push(" ORDER BY created_at DESC, id ASC LIMIT ")
            .push_bind(filter.limit.unwrap_or(-1))
            .push(" OFFSET ")
            .push_bind(filter.offset.unwrap_or(0).max(0));

        let rows: Vec<JobRow> = qb
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn count(&self, filter: &JobFilter) -> Result<i64> {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut qb, filter);

        qb.build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn find_executions(&self, job_id: &JobId, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM job_executions WHERE job_id = ? ORDER BY started_at DESC, attempt DESC LIMIT ?",
            EXECUTION_COLUMNS
        ))
        .bind(job_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(ExecutionRow::into_record).collect()
    }

    async fn delete_older_than(&self, statuses: &[JobStatus], cutoff: i64) -> Result<u64> {
        let statuses: Vec<JobStatus> = statuses
            .iter()
            .copied()
            .filter(|s| s.is_terminal())
            .collect();
        if statuses.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut history = QueryBuilder::<Sqlite>::new(
            "DELETE FROM job_executions WHERE job_id IN (SELECT id FROM jobs WHERE",
        );
        push_expired(&mut history, &statuses, cutoff);
        history.push(")");
        history
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let mut jobs = QueryBuilder::<Sqlite>::new("DELETE FROM jobs WHERE");
        push_expired(&mut jobs, &statuses, cutoff);
        let deleted = jobs
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        if deleted > 0 {
            info!(deleted, cutoff, "Deleted expired jobs");
        }
        Ok(deleted)
    }

    async fn archive_older_than(&self, cutoff: i64) -> Result<u64> {
        let now = self.time_provider.now_millis();
        let expired = format!(
            "status IN ({}) AND COALESCE(completed_at, updated_at) < ?",
            terminal_status_list()
        );

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO job_executions_archive ({cols}, archived_at) \
             SELECT {cols}, ? FROM job_executions \
             WHERE job_id IN (SELECT id FROM jobs WHERE {expired})",
            cols = EXECUTION_COLUMNS,
            expired = expired
        ))
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(&format!(
            "INSERT OR REPLACE INTO jobs_archive ({cols}, archived_at) \
             SELECT {cols}, ? FROM jobs WHERE {expired}",
            cols = JOB_COLUMNS,
            expired = expired
        ))
        .bind(now)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(&format!(
            "DELETE FROM job_executions WHERE job_id IN (SELECT id FROM jobs WHERE {})",
            expired
        ))
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        let archived = sqlx::query(&format!("DELETE FROM jobs WHERE {}", expired))
            .bind(cutoff)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        tx.commit().await.map_err(map_sqlx_error)?;

        if archived > 0 {
            info!(archived, cutoff, "Archived expired jobs");
        }
        Ok(archived)
    }

    async fn stats(&self, since: Option<i64>) -> Result<JobStats> {
        self.collect_stats(None, since.unwrap_or(i64::MIN)).await
    }

    async fn stats_by_type(&self, since: Option<i64>) -> Result<Vec<TypeStats>> {
        let since = since.unwrap_or(i64::MIN);
        let types: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT job_type FROM jobs WHERE created_at >= ? ORDER BY job_type",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut result = Vec::with_capacity(types.len());
        for name in types {
            let job_type: JobType = name.parse().map_err(|e| corrupt("job_type", &name, e))?;
            let stats = self.collect_stats(Some(job_type), since).await?;
            result.push(TypeStats { job_type, stats });
        }
        // Same order as JobType::ALL
        result.sort_by_key(|t| t.job_type);
        Ok(result)
    }
}

fn corrupt(column: &str, value: &str, err: impl std::fmt::Display) -> AppError {
    AppError::Database(format!("Corrupt {} value '{}': {}", column, value, err))
}

/// SQLite row representation of `jobs`
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    name: String,
    job_group: String,
    job_type: String,
    status: String,
    priority: i32,
    parameters: String,
    schedule: String,
    attempts: i32,
    max_attempts: i32,
    backoff_delay_ms: i64,
    timeout_seconds: i64,
    active_executions: i32,
    cancel_requested: bool,
    last_error: Option<String>,
    consecutive_failures: i32,
    circuit_breaker_open: bool,
    breaker_opened_at: Option<i64>,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    next_execution_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
    version: i64,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        let job_type: JobType = self
            .job_type
            .parse()
            .map_err(|e| corrupt("job_type", &self.job_type, e))?;
        let status: JobStatus = self
            .status
            .parse()
            .map_err(|e| corrupt("status", &self.status, e))?;

        // Parameters go back through the type's schema
        let raw: serde_json::Value = serde_json::from_str(&self.parameters)?;
        let parameters = JobParameters::parse(job_type, raw)
            .map_err(|e| corrupt("parameters", &self.id, e))?;
        let schedule: Schedule = serde_json::from_str(&self.schedule)?;

        Ok(Job {
            id: self.id,
            name: self.name,
            group: self.job_group,
            job_type,
            status,
            priority: self.priority,
            parameters,
            schedule,
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            backoff_delay_ms: self.backoff_delay_ms,
            timeout_seconds: self.timeout_seconds,
            active_executions: self.active_executions,
            cancel_requested: self.cancel_requested,
            last_error: self.last_error,
            consecutive_failures: self.consecutive_failures,
            circuit_breaker_open: self.circuit_breaker_open,
            breaker_opened_at: self.breaker_opened_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            next_execution_at: self.next_execution_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    job_id: String,
    attempt: i32,
    started_at: i64,
    finished_at: i64,
    outcome: String,
    duration_ms: i64,
    error_message: Option<String>,
}

impl ExecutionRow {
    fn into_record(self) -> Result<ExecutionRecord> {
        let outcome: ExecutionOutcome = self
            .outcome
            .parse()
            .map_err(|e| corrupt("outcome", &self.outcome, e))?;

        Ok(ExecutionRecord {
            id: self.id,
            job_id: self.job_id,
            attempt: self.attempt,
            started_at: self.started_at,
            finished_at: self.finished_at,
            outcome,
            duration_ms: self.duration_ms,
            error_message: self.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use kairos_core::port::time_provider::mocks::ManualClock;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    const NOW: i64 = 1_700_000_000_000;

    async fn setup_test_db() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool, Arc::new(ManualClock::new(NOW)))
    }

    fn webhook_job() -> Job {
        let params = JobParameters::parse(
            JobType::WebhookHttpCall,
            json!({"url": "https://hooks.example.com/deploy", "method": "POST"}),
        )
        .unwrap();
        Job::new_test(JobType::WebhookHttpCall, params, Schedule::once(NOW))
    }

    fn scheduled(mut job: Job, at: i64) -> Job {
        job.schedule(at, at).unwrap();
        job
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = setup_test_db().await;
        let mut job = webhook_job();
        job.schedule = Schedule::Cron {
            expression: "0 */5 * * * *".into(),
            timezone: Some("Europe/Berlin".into()),
        };

        store.insert(&job).await.unwrap();

        let found = store.find_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(found, job);
        assert!(store.find_by_id(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let store = setup_test_db().await;
        let job = webhook_job();

        assert_ok!(store.insert(&job).await);
        let err = assert_err!(store.insert(&job).await);
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_save_bumps_version_and_rejects_stale_copy() {
        let store = setup_test_db().await;
        let job = webhook_job();
        store.insert(&job).await.unwrap();

        let stale = job.clone();
        let saved = store.save(&scheduled(job, NOW)).await.unwrap();
        assert_eq!(saved.version, 1);

        let err = store.save(&stale).await.unwrap_err();
        assert!(err.is_version_conflict());

        let stored = store.find_by_id(&saved.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Scheduled);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_save_missing_row_is_not_found() {
        let store = setup_test_db().await;
        let err = store.save(&webhook_job()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_save_with_record_is_atomic() {
        let store = setup_test_db().await;
        let mut job = scheduled(webhook_job(), NOW);
        store.insert(&job).await.unwrap();

        job.begin_attempt(NOW).unwrap();
        let running = store.save(&job).await.unwrap();

        let record = ExecutionRecord::new(
            "exec-1",
            running.id.clone(),
            1,
            NOW,
            NOW + 250,
            ExecutionOutcome::Success,
            None,
        );

        // Stale version: neither row nor record is written
        let mut stale = running.clone();
        stale.version = 0;
        stale.complete(NOW + 250).unwrap();
        assert!(store
            .save_with_record(&stale, &record)
            .await
            .unwrap_err()
            .is_version_conflict());
        assert!(store.find_executions(&running.id, 10).await.unwrap().is_empty());

        let mut done = running.clone();
        done.complete(NOW + 250).unwrap();
        let saved = store.save_with_record(&done, &record).await.unwrap();
        assert_eq!(saved.version, 2);

        let history = store.find_executions(&running.id, 10).await.unwrap();
        assert_eq!(history, vec![record]);
    }

    #[tokio::test]
    async fn test_find_ready_orders_by_priority_then_due_time() {
        let store = setup_test_db().await;

        let mut low = scheduled(webhook_job(), NOW - 5_000);
        low.priority = 10;
        let mut high_late = scheduled(webhook_job(), NOW - 1_000);
        high_late.priority = 90;
        let mut high_early = scheduled(webhook_job(), NOW - 2_000);
        high_early.priority = 90;
        let future = scheduled(webhook_job(), NOW + 60_000);
        let mut tripped = scheduled(webhook_job(), NOW - 1_000);
        tripped.circuit_breaker_open = true;
        let created = webhook_job();

        for job in [&low, &high_late, &high_early, &future, &tripped, &created] {
            store.insert(job).await.unwrap();
        }

        let ready: Vec<JobId> = store
            .find_ready(NOW, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ready, vec![high_early.id.clone(), high_late.id, low.id]);

        assert_eq!(store.find_ready(NOW, 1).await.unwrap()[0].id, high_early.id);
        assert_eq!(store.find_open_breakers().await.unwrap()[0].id, tripped.id);
    }

    #[tokio::test]
    async fn test_retry_ready_only_includes_consumed_attempts() {
        let store = setup_test_db().await;
        let fresh = scheduled(webhook_job(), NOW - 1_000);
        let mut retry = scheduled(webhook_job(), NOW - 1_000);
        retry.attempts = 1;

        store.insert(&fresh).await.unwrap();
        store.insert(&retry).await.unwrap();

        let found = store.find_retry_ready(NOW, 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, retry.id);
    }

    #[tokio::test]
    async fn test_find_timed_out() {
        let store = setup_test_db().await;

        let mut overdue = scheduled(webhook_job(), NOW - 20_000);
        overdue.timeout_seconds = 10;
        overdue.begin_attempt(NOW - 20_000).unwrap();

        let mut healthy = scheduled(webhook_job(), NOW - 20_000);
        healthy.timeout_seconds = 60;
        healthy.begin_attempt(NOW - 20_000).unwrap();

        store.insert(&overdue).await.unwrap();
        store.insert(&healthy).await.unwrap();

        let found = store.find_timed_out(NOW).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, overdue.id);
    }

    #[tokio::test]
    async fn test_list_and_count_with_filters() {
        let store = setup_test_db().await;

        let mut nightly = webhook_job();
        nightly.name = "nightly_sync".into();
        nightly.group = "ops".into();
        nightly.created_at = NOW;
        let mut hourly = webhook_job();
        hourly.name = "hourly-sync".into();
        hourly.created_at = NOW + 1;
        let mut other = scheduled(webhook_job(), NOW);
        other.name = "report".into();
        other.created_at = NOW + 2;

        for job in [&nightly, &hourly, &other] {
            store.insert(job).await.unwrap();
        }

        let by_name = JobFilter {
            name: Some("sync".into()),
            ..Default::default()
        };
        let names: Vec<String> = store
            .list(&by_name)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.name)
            .collect();
        assert_eq!(names, vec!["hourly-sync", "nightly_sync"]);
        assert_eq!(store.count(&by_name).await.unwrap(), 2);

        // `_` is literal, not a wildcard
        let underscore = JobFilter {
            name: Some("y_s".into()),
            ..Default::default()
        };
        assert_eq!(store.count(&underscore).await.unwrap(), 1);

        let ops = JobFilter {
            group: Some("ops".into()),
            ..Default::default()
        };
        assert_eq!(store.list(&ops).await.unwrap()[0].id, nightly.id);

        let scheduled_only = JobFilter::by_status(JobStatus::Scheduled);
        assert_eq!(store.count(&scheduled_only).await.unwrap(), 1);

        let page = JobFilter {
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        assert_eq!(store.list(&page).await.unwrap()[0].id, hourly.id);
        assert_eq!(store.count(&page).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_delete_checks_version_and_removes_history() {
        let store = setup_test_db().await;
        let mut job = scheduled(webhook_job(), NOW);
        store.insert(&job).await.unwrap();
        job.begin_attempt(NOW).unwrap();
        let mut running = store.save(&job).await.unwrap();
        running.fail(NOW + 10).unwrap();
        let record = ExecutionRecord::new(
            "exec-9",
            running.id.clone(),
            1,
            NOW,
            NOW + 10,
            ExecutionOutcome::Failure,
            Some("boom".into()),
        );
        let failed = store.save_with_record(&running, &record).await.unwrap();

        assert!(store
            .delete(&failed.id, 0)
            .await
            .unwrap_err()
            .is_version_conflict());

        store.delete(&failed.id, failed.version).await.unwrap();
        assert!(store.find_by_id(&failed.id).await.unwrap().is_none());
        assert!(store.find_executions(&failed.id, 10).await.unwrap().is_empty());

        let err = store.delete(&failed.id, failed.version).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    async fn insert_finished(store: &SqliteJobStore, finished_at: i64, status: JobStatus) -> Job {
        let mut job = scheduled(webhook_job(), finished_at - 100);
        job.begin_attempt(finished_at - 100).unwrap();
        match status {
            JobStatus::Completed => job.complete(finished_at).unwrap(),
            JobStatus::Failed => job.fail(finished_at).unwrap(),
            JobStatus::Cancelled => {
                job.request_cancel(finished_at).unwrap();
                job.finish_cancelled(finished_at).unwrap();
            }
            _ => {}
        }
        store.insert(&job).await.unwrap();
        let record = ExecutionRecord::new(
            format!("exec-{}", job.id),
            job.id.clone(),
            1,
            finished_at - 100,
            finished_at,
            ExecutionOutcome::Success,
            None,
        );
        let mut copy = job.clone();
        copy.updated_at = finished_at;
        store.save_with_record(&copy, &record).await.unwrap()
    }

    #[tokio::test]
    async fn test_delete_older_than_only_touches_expired_terminal_jobs() {
        let store = setup_test_db().await;
        let old_done = insert_finished(&store, NOW - 10_000, JobStatus::Completed).await;
        let old_failed = insert_finished(&store, NOW - 10_000, JobStatus::Failed).await;
        let recent = insert_finished(&store, NOW, JobStatus::Completed).await;
        let pending = scheduled(webhook_job(), NOW - 50_000);
        store.insert(&pending).await.unwrap();

        // Non-terminal statuses in the list are ignored
        let deleted = store
            .delete_older_than(&[JobStatus::Completed, JobStatus::Scheduled], NOW - 1_000)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.find_by_id(&old_done.id).await.unwrap().is_none());
        assert!(store.find_executions(&old_done.id, 10).await.unwrap().is_empty());
        assert!(store.find_by_id(&old_failed.id).await.unwrap().is_some());
        assert!(store.find_by_id(&recent.id).await.unwrap().is_some());
        assert!(store.find_by_id(&pending.id).await.unwrap().is_some());

        assert_eq!(
            store
                .delete_older_than(&[JobStatus::Scheduled], NOW)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_archive_moves_jobs_and_history() {
        let store = setup_test_db().await;
        let old = insert_finished(&store, NOW - 10_000, JobStatus::Cancelled).await;
        let recent = insert_finished(&store, NOW, JobStatus::Completed).await;

        let archived = store.archive_older_than(NOW - 1_000).await.unwrap();
        assert_eq!(archived, 1);
        assert!(store.find_by_id(&old.id).await.unwrap().is_none());
        assert!(store.find_by_id(&recent.id).await.unwrap().is_some());

        let (jobs, executions): (i64, i64) = sqlx::query_as(
            "SELECT (SELECT COUNT(*) FROM jobs_archive WHERE id = ?1), \
                    (SELECT COUNT(*) FROM job_executions_archive WHERE job_id = ?1)",
        )
        .bind(&old.id)
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!((jobs, executions), (1, 1));
    }

    #[tokio::test]
    async fn test_stats_overall_and_by_type() {
        let store = setup_test_db().await;
        insert_finished(&store, NOW, JobStatus::Completed).await;
        insert_finished(&store, NOW, JobStatus::Failed).await;
        let mut tripped = scheduled(webhook_job(), NOW);
        tripped.circuit_breaker_open = true;
        store.insert(&tripped).await.unwrap();

        let report = JobParameters::parse(
            JobType::ReportGeneration,
            json!({"report": "weekly-revenue", "format": "CSV"}),
        )
        .unwrap();
        let report_job = Job::new_test(JobType::ReportGeneration, report, Schedule::once(NOW));
        store.insert(&report_job).await.unwrap();

        let stats = store.stats(None).await.unwrap();
        assert_eq!(stats.total_jobs, 4);
        assert_eq!(stats.by_status.get(&JobStatus::Completed), Some(&1));
        assert_eq!(stats.by_status.get(&JobStatus::Created), Some(&1));
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.avg_duration_ms, Some(100.0));
        assert_eq!(stats.open_breakers, 1);

        let by_type = store.stats_by_type(None).await.unwrap();
        assert_eq!(by_type.len(), 2);
        assert_eq!(by_type[0].job_type, JobType::WebhookHttpCall);
        assert_eq!(by_type[0].stats.total_jobs, 3);
        assert_eq!(by_type[0].stats.executions, 2);
        assert_eq!(by_type[1].job_type, JobType::ReportGeneration);
        assert_eq!(by_type[1].stats.executions, 0);
        assert_eq!(by_type[1].stats.avg_duration_ms, None);

        let future = store.stats(Some(NOW + 1_000_000)).await.unwrap();
        assert_eq!(future.total_jobs, 0);
        assert_eq!(future.executions, 0);
    }
}
