// HTTP probe handler: monitoring health checks
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::info;

use crate::until_cancelled;
use crate::webhook::user_agent;
use kairos_core::domain::JobParameters;
use kairos_core::port::{ExecutionContext, HandlerError, HandlerOutput, JobHandler};

/// GETs the target and checks status and latency
pub struct HttpProbeHandler {
    client: Client,
}

impl HttpProbeHandler {
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
impl JobHandler for HttpProbeHandler {
    fn name(&self) -> &'static str {
        "http-probe"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &JobParameters,
    ) -> Result<HandlerOutput, HandlerError> {
        let JobParameters::Monitoring(probe) = params else {
            return Err(HandlerError::InvalidParameters(format!(
                "{} expects monitoring parameters",
                ctx.job_type
            )));
        };

        let started = Instant::now();
        let response = until_cancelled(ctx, self.client.get(&probe.target).send())
            .await?
            .map_err(|e| HandlerError::Failed(format!("{} unreachable: {}", probe.target, e)))?;
        let latency_ms = started.elapsed().as_millis() as u64;

        let status = response.status().as_u16();
        let healthy = match probe.expected_status {
            Some(expected) => status == expected,
            None => response.status().is_success(),
        };
        if !healthy {
            return Err(HandlerError::Failed(format!(
                "{} answered HTTP {}",
                probe.target, status
            )));
        }

        if let Some(max) = probe.max_latency_ms {
            if latency_ms > max {
                return Err(HandlerError::Failed(format!(
                    "{} answered in {}ms, limit is {}ms",
                    probe.target, latency_ms, max
                )));
            }
        }

        info!(job_id = %ctx.job_id, target = %probe.target, status, latency_ms, "Probe healthy");
        Ok(HandlerOutput::with_summary(format!(
            "HTTP {} in {}ms",
            status, latency_ms
        )))
    }
}
