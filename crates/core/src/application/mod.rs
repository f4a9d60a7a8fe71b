// Application Layer - Use Cases and Business Logic

pub mod circuit_breaker;
pub mod constants;
pub mod control;
pub mod dispatcher;
pub mod maintenance;
pub mod orchestrator;
pub mod retry;
pub mod shutdown;
pub mod trigger;

// Re-exports
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use control::{ControlService, CreateJobRequest, HealthReport, UpdateJobRequest};
pub use dispatcher::TypeDispatcher;
pub use maintenance::{MaintenanceSweeper, SweepReport, SweeperConfig};
pub use orchestrator::{
    AttemptResult, DispatchOutcome, Orchestrator, OrchestratorConfig, OutcomeResolver, Resolution,
};
pub use retry::{BackoffPolicy, BackoffStrategy, Exponential, FixedDelay, RetryDecision};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use trigger::{TriggerConfig, TriggerLoop};
