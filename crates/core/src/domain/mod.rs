// Domain Layer - Pure business logic and entities

pub mod error;
pub mod execution;
pub mod job;
pub mod job_type;
pub mod parameters;
pub mod schedule;

// Re-exports
pub use error::DomainError;
pub use execution::{ExecutionOutcome, ExecutionRecord};
pub use job::{Job, JobId, JobStatus, Priority};
pub use job_type::{JobFamily, JobType};
pub use parameters::{
    BatchParameters, CommandParameters, EtlParameters, HttpMethod, JobParameters,
    MonitoringParameters, NotificationParameters, ReportFormat, ReportParameters,
    WebhookParameters,
};
pub use schedule::Schedule;
