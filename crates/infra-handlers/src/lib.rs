// Kairos Infrastructure - Job Handlers
// Implements: JobHandler (CommandHandler, WebhookHandler, HttpProbeHandler)

mod command;
mod probe;
mod webhook;

pub use command::{CommandHandler, DEFAULT_ENV_ALLOWLIST};
pub use probe::HttpProbeHandler;
pub use webhook::WebhookHandler;

use kairos_core::port::{ExecutionContext, HandlerError};
use std::future::Future;

/// Race `work` against the attempt's cancellation token
pub(crate) async fn until_cancelled<F: Future>(
    ctx: &ExecutionContext,
    work: F,
) -> Result<F::Output, HandlerError> {
    tokio::select! {
        biased;
        _ = ctx.cancellation.cancelled() => Err(HandlerError::Cancelled),
        output = work => Ok(output),
    }
}

/// Last `max_chars` characters of a process or response stream, trimmed
pub(crate) fn tail(raw: &[u8], max_chars: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let skip = text.chars().count().saturating_sub(max_chars);
    text.chars().skip(skip).collect()
}
