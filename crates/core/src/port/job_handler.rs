// Job Handler Port
// Contract every type-specific handler (ETL, webhook, report, ...) satisfies

use crate::domain::{JobId, JobParameters, JobType};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Per-attempt context handed to a handler
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub job_id: JobId,
    pub job_type: JobType,
    /// 1-based attempt number
    pub attempt: i32,
    /// Absolute deadline (epoch ms) after which the orchestrator stops waiting
    pub deadline_at: i64,
    /// Fired on timeout or administrative cancel. Handlers should check it at
    /// every await point they control.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Successful handler result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerOutput {
    pub summary: Option<String>,
}

impl HandlerOutput {
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
        }
    }
}

/// Handler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    Failed(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(String),
}

/// Job Handler trait
///
/// The orchestrator invokes a handler at most once per attempt, inside a
/// spawned task bounded by the attempt deadline.
///
/// Implementations (kairos-infra-handlers):
/// - CommandHandler: maintenance / custom jobs as child processes
/// - WebhookHandler: HTTP calls
/// - HttpProbeHandler: monitoring health checks
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Execute one attempt
    ///
    /// # Errors
    /// - HandlerError::Failed if the work itself failed
    /// - HandlerError::Cancelled if the cancellation token fired first
    /// - HandlerError::InvalidParameters if parameters of another family were passed
    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &JobParameters,
    ) -> Result<HandlerOutput, HandlerError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Mock handler behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Succeed immediately
        Succeed,
        /// Fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Sleep, then succeed
        Sleep(Duration),
        /// Block until the cancellation token fires
        WaitForCancel,
        /// Ignore cancellation and sleep (non-cooperative handler)
        SleepIgnoringCancel(Duration),
    }

    /// Handler that replays a script of behaviors; the last one repeats
    pub struct ScriptedHandler {
        script: Mutex<VecDeque<MockBehavior>>,
        fallback: MockBehavior,
        call_count: AtomicUsize,
    }

    impl ScriptedHandler {
        pub fn new(behavior: MockBehavior) -> Self {
            Self::scripted(Vec::new(), behavior)
        }

        pub fn scripted(script: Vec<MockBehavior>, fallback: MockBehavior) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn succeeding() -> Self {
            Self::new(MockBehavior::Succeed)
        }

        pub fn failing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        fn next_behavior(&self) -> MockBehavior {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone())
        }
    }

    #[async_trait]
    impl JobHandler for ScriptedHandler {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn execute(
            &self,
            ctx: &ExecutionContext,
            _params: &JobParameters,
        ) -> Result<HandlerOutput, HandlerError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);

            match self.next_behavior() {
                MockBehavior::Succeed => Ok(HandlerOutput::with_summary("ok")),
                MockBehavior::Fail(msg) => Err(HandlerError::Failed(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
                MockBehavior::Sleep(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => Ok(HandlerOutput::default()),
                        _ = ctx.cancellation.cancelled() => Err(HandlerError::Cancelled),
                    }
                }
                MockBehavior::WaitForCancel => {
                    ctx.cancellation.cancelled().await;
                    Err(HandlerError::Cancelled)
                }
                MockBehavior::SleepIgnoringCancel(duration) => {
                    tokio::time::sleep(duration).await;
                    Ok(HandlerOutput::default())
                }
            }
        }
    }
}
