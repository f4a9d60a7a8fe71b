// Storage Maintenance port
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub db_size_mb: f64,
    pub db_size_bytes: i64,
    pub job_count: i64,
    pub terminal_job_count: i64,
    pub execution_count: i64,
    pub archived_job_count: i64,
}

/// Storage-level maintenance operations
#[async_trait]
pub trait Maintenance: Send + Sync {
    /// Run VACUUM to reclaim space
    ///
    /// # Returns
    /// Space reclaimed in MB
    async fn vacuum(&self) -> Result<f64>;

    /// Get storage statistics
    async fn get_stats(&self) -> Result<StorageStats>;

    /// Cheap round-trip used by health checks
    async fn ping(&self) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Maintenance stub reporting fixed statistics
    #[derive(Default)]
    pub struct StaticMaintenance {
        stats: Mutex<StorageStats>,
        vacuum_calls: AtomicUsize,
        unreachable: AtomicBool,
    }

    impl StaticMaintenance {
        pub fn with_size_mb(db_size_mb: f64) -> Self {
            let stats = StorageStats {
                db_size_mb,
                db_size_bytes: (db_size_mb * 1024.0 * 1024.0) as i64,
                ..Default::default()
            };
            Self {
                stats: Mutex::new(stats),
                ..Default::default()
            }
        }

        pub fn set_unreachable(&self, unreachable: bool) {
            self.unreachable.store(unreachable, Ordering::SeqCst);
        }

        pub fn vacuum_calls(&self) -> usize {
            self.vacuum_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Maintenance for StaticMaintenance {
        async fn vacuum(&self) -> Result<f64> {
            self.vacuum_calls.fetch_add(1, Ordering::SeqCst);
            Ok(0.0)
        }

        async fn get_stats(&self) -> Result<StorageStats> {
            Ok(self.stats.lock().unwrap().clone())
        }

        async fn ping(&self) -> Result<()> {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(AppError::Database("store unreachable".into()));
            }
            Ok(())
        }
    }
}
