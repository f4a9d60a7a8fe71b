// Webhook handler: one HTTP call per attempt
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::time::Duration;
use tracing::{debug, info};

use crate::{tail, until_cancelled};
use kairos_core::domain::{HttpMethod, JobParameters};
use kairos_core::port::{ExecutionContext, HandlerError, HandlerOutput, JobHandler};

const RESPONSE_TAIL_CHARS: usize = 256;

pub(crate) fn user_agent() -> String {
    format!("kairos/{}", kairos_core::VERSION)
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Calls the configured URL. Any 2xx is a success unless the job pins
/// `expected_status`.
pub struct WebhookHandler {
    client: Client,
}

impl WebhookHandler {
    /// `request_timeout` bounds a single call independently of the job timeout
    pub fn new(request_timeout: Duration) -> Result<Self, HandlerError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(user_agent())
            .build()
            .map_err(|e| HandlerError::Io(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobHandler for WebhookHandler {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &JobParameters,
    ) -> Result<HandlerOutput, HandlerError> {
        let JobParameters::Webhook(hook) = params else {
            return Err(HandlerError::InvalidParameters(format!(
                "{} expects webhook parameters",
                ctx.job_type
            )));
        };

        let mut request = self
            .client
            .request(method(hook.method), &hook.url)
            .header("x-kairos-job-id", ctx.job_id.as_str())
            .header("x-kairos-attempt", ctx.attempt.to_string());
        for (name, value) in &hook.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &hook.body {
            request = request.json(body);
        }

        debug!(job_id = %ctx.job_id, method = hook.method.as_str(), url = %hook.url, "Calling webhook");

        let response = until_cancelled(ctx, request.send())
            .await?
            .map_err(|e| HandlerError::Failed(format!("request to {} failed: {}", hook.url, e)))?;

        let status = response.status();
        let accepted = match hook.expected_status {
            Some(expected) => status.as_u16() == expected,
            None => status.is_success(),
        };

        if !accepted {
            let body = until_cancelled(ctx, response.bytes())
                .await?
                .map(|b| tail(&b, RESPONSE_TAIL_CHARS))
                .unwrap_or_default();
            return Err(HandlerError::Failed(format!(
                "{} {} returned HTTP {}: {}",
                hook.method.as_str(),
                hook.url,
                status.as_u16(),
                body
            )));
        }

        info!(job_id = %ctx.job_id, status = status.as_u16(), "Webhook delivered");
        Ok(HandlerOutput::with_summary(format!("HTTP {}", status.as_u16())))
    }
}
