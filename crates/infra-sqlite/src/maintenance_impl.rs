// SQLite Maintenance Implementation
use crate::map_sqlx_error;
use async_trait::async_trait;
use kairos_core::domain::JobStatus;
use kairos_core::error::{AppError, Result};
use kairos_core::port::{Maintenance, StorageStats};
use sqlx::SqlitePool;
use tracing::info;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// SQLite maintenance implementation
pub struct SqliteMaintenance {
    pool: SqlitePool,
}

impl SqliteMaintenance {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// DB file size in bytes
    async fn db_size_bytes(&self) -> Result<i64> {
        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page count: {}", e)))?;

        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to get page size: {}", e)))?;

        Ok(page_count * page_size)
    }

    async fn count(&self, sql: &str) -> Result<i64> {
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait]
impl Maintenance for SqliteMaintenance {
    async fn vacuum(&self) -> Result<f64> {
        info!("Running VACUUM to optimize database...");

        let size_before = self.db_size_bytes().await? as f64 / BYTES_PER_MB;

        // Reclaims space and defragments
        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(format!("VACUUM failed: {}", e)))?;

        let size_after = self.db_size_bytes().await? as f64 / BYTES_PER_MB;
        let reclaimed = (size_before - size_after).max(0.0);

        info!(
            size_before_mb = size_before,
            size_after_mb = size_after,
            reclaimed_mb = reclaimed,
            "VACUUM completed"
        );

        Ok(reclaimed)
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let db_size_bytes = self.db_size_bytes().await?;

        let terminal = JobStatus::TERMINAL
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        Ok(StorageStats {
            db_size_mb: db_size_bytes as f64 / BYTES_PER_MB,
            db_size_bytes,
            job_count: self.count("SELECT COUNT(*) FROM jobs").await?,
            terminal_job_count: self
                .count(&format!(
                    "SELECT COUNT(*) FROM jobs WHERE status IN ({})",
                    terminal
                ))
                .await?,
            execution_count: self.count("SELECT COUNT(*) FROM job_executions").await?,
            archived_job_count: self.count("SELECT COUNT(*) FROM jobs_archive").await?,
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};

    async fn setup() -> SqliteMaintenance {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteMaintenance::new(pool)
    }

    #[tokio::test]
    async fn test_maintenance_stats() {
        let maintenance = setup().await;
        let stats = maintenance.get_stats().await.unwrap();

        assert!(stats.db_size_bytes > 0);
        assert!(stats.db_size_mb > 0.0);
        assert_eq!(stats.job_count, 0);
        assert_eq!(stats.archived_job_count, 0);
    }

    #[tokio::test]
    async fn test_vacuum() {
        let maintenance = setup().await;
        let reclaimed = maintenance.vacuum().await.unwrap();
        assert!(reclaimed >= 0.0);
    }

    #[tokio::test]
    async fn test_ping_fails_on_closed_pool() {
        let maintenance = setup().await;
        assert!(maintenance.ping().await.is_ok());

        maintenance.pool.close().await;
        assert!(maintenance.ping().await.is_err());
    }
}
