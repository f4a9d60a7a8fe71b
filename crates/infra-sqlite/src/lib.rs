// Kairos Infrastructure - SQLite Adapter
// Implements: JobStore, Maintenance

mod connection;
mod job_store;
mod maintenance_impl;
mod migration;

pub use connection::{create_pool, create_pool_at};
pub use job_store::SqliteJobStore;
pub use maintenance_impl::SqliteMaintenance;
pub use migration::run_migrations;

// Note: sqlx::Error conversion is handled by map_sqlx_error in job_store
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
pub(crate) use job_store::map_sqlx_error;
