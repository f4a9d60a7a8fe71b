// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_handler;
pub mod job_store;
pub mod maintenance;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use job_handler::{ExecutionContext, HandlerError, HandlerOutput, JobHandler};
pub use job_store::{JobFilter, JobStats, JobStore, TypeStats};
pub use maintenance::{Maintenance, StorageStats};
pub use time_provider::TimeProvider;
