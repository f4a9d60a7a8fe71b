// Command handler: maintenance and custom jobs as isolated child processes
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::tail;
use kairos_core::domain::JobParameters;
use kairos_core::port::{ExecutionContext, HandlerError, HandlerOutput, JobHandler};

/// Variables passed through when no allowlist is configured
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "TZ"];

/// Time between SIGTERM and the hard kill on cancellation
const GRACEFUL_KILL_TIMEOUT: Duration = Duration::from_secs(5);

const OUTPUT_TAIL_CHARS: usize = 512;

/// Spawns one child process per attempt
///
/// The child starts with an empty environment: only allowlisted variables of
/// the daemon and allowlisted entries of the job's `env` reach it. On
/// cancellation the child gets SIGTERM, then SIGKILL after the grace period.
pub struct CommandHandler {
    env_allowlist: Vec<String>,
    grace_period: Duration,
}

impl CommandHandler {
    pub fn new(env_allowlist: Vec<String>) -> Self {
        Self {
            env_allowlist,
            grace_period: GRACEFUL_KILL_TIMEOUT,
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn is_allowed(&self, key: &str) -> bool {
        self.env_allowlist.iter().any(|allowed| allowed == key)
    }

    /// Filter environment variables to allowlist only
    fn build_env(&self, job_env: &BTreeMap<String, String>) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = std::env::vars()
            .filter(|(k, _)| self.is_allowed(k))
            .collect();

        for (key, value) in job_env {
            if self.is_allowed(key) {
                env.insert(key.clone(), value.clone());
            } else {
                warn!(key = %key, "Dropping job env variable outside the allowlist");
            }
        }
        env
    }
}

impl Default for CommandHandler {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_ALLOWLIST.iter().map(|s| s.to_string()).collect())
    }
}

#[async_trait]
impl JobHandler for CommandHandler {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &JobParameters,
    ) -> Result<HandlerOutput, HandlerError> {
        let JobParameters::Command(invocation) = params else {
            return Err(HandlerError::InvalidParameters(format!(
                "{} expects command parameters",
                ctx.job_type
            )));
        };

        let mut command = Command::new(&invocation.command);
        command
            .args(&invocation.args)
            .env_clear()
            .envs(self.build_env(&invocation.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| HandlerError::Io(format!("failed to spawn '{}': {}", invocation.command, e)))?;
        let pid = child.id();
        let started = Instant::now();

        info!(
            job_id = %ctx.job_id,
            attempt = ctx.attempt,
            command = %invocation.command,
            args = ?invocation.args,
            pid = ?pid,
            "Child process started"
        );

        let output = child.wait_with_output();
        tokio::pin!(output);

        let output = tokio::select! {
            result = &mut output => result.map_err(|e| HandlerError::Io(e.to_string()))?,
            _ = ctx.cancellation.cancelled() => {
                terminate(pid);
                if timeout(self.grace_period, &mut output).await.is_err() {
                    // Dropping the wait future kills the child (kill_on_drop)
                    warn!(job_id = %ctx.job_id, pid = ?pid, "Child ignored SIGTERM, killing");
                }
                return Err(HandlerError::Cancelled);
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(
            job_id = %ctx.job_id,
            exit_code = ?output.status.code(),
            duration_ms,
            "Child process exited"
        );

        if output.status.success() {
            let stdout = tail(&output.stdout, OUTPUT_TAIL_CHARS);
            return Ok(if stdout.is_empty() {
                HandlerOutput::default()
            } else {
                HandlerOutput::with_summary(stdout)
            });
        }

        let status = match output.status.code() {
            Some(code) => format!("exit code {}", code),
            None => "a signal".to_string(),
        };
        Err(HandlerError::Failed(format!(
            "'{}' terminated with {}: {}",
            invocation.command,
            status,
            tail(&output.stderr, OUTPUT_TAIL_CHARS)
        )))
    }
}

#[cfg(unix)]
fn terminate(pid: Option<u32>) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        warn!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::context;
    use kairos_core::domain::JobType;
    use serde_json::json;
    use tokio_test::assert_ok;

    fn command(value: serde_json::Value) -> JobParameters {
        JobParameters::parse(JobType::MaintenanceCleanup, value).unwrap()
    }

    fn handler() -> CommandHandler {
        CommandHandler::new(vec!["PATH".into(), "ALLOWED_VAR".into()])
    }

    #[tokio::test]
    async fn test_execute_success() {
        let ctx = context(JobType::MaintenanceCleanup);
        let params = command(json!({"command": "echo", "args": ["hello"]}));

        let output = assert_ok!(handler().execute(&ctx, &params).await);
        assert_eq!(output.summary.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_with_stderr() {
        let ctx = context(JobType::Custom);
        let params = command(json!({
            "command": "sh",
            "args": ["-c", "echo disk full >&2; exit 3"]
        }));

        let err = handler().execute(&ctx, &params).await.unwrap_err();
        match err {
            HandlerError::Failed(msg) => {
                assert!(msg.contains("exit code 3"), "{}", msg);
                assert!(msg.contains("disk full"), "{}", msg);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_env_filtering() {
        let ctx = context(JobType::MaintenanceCleanup);
        let params = command(json!({
            "command": "sh",
            "args": ["-c", "echo ${ALLOWED_VAR:-none}-${BLOCKED_VAR:-none}"],
            "env": {"ALLOWED_VAR": "value1", "BLOCKED_VAR": "value2"}
        }));

        let output = handler().execute(&ctx, &params).await.unwrap();
        assert_eq!(output.summary.as_deref(), Some("value1-none"));
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let ctx = context(JobType::MaintenanceBackup);
        let params = command(json!({"command": "pwd", "working_dir": "/"}));

        let output = handler().execute(&ctx, &params).await.unwrap();
        assert_eq!(output.summary.as_deref(), Some("/"));
    }

    #[tokio::test]
    async fn test_cancel_terminates_child() {
        let ctx = context(JobType::MaintenanceCleanup);
        let params = command(json!({"command": "sleep", "args": ["30"]}));
        let token = ctx.cancellation.clone();

        let started = Instant::now();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let result = handler()
            .with_grace_period(Duration::from_secs(2))
            .execute(&ctx, &params)
            .await;

        assert_eq!(result, Err(HandlerError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let ctx = context(JobType::Custom);
        let params = command(json!({"command": "/definitely/not/a/binary"}));

        let err = handler().execute(&ctx, &params).await.unwrap_err();
        assert!(matches!(err, HandlerError::Io(_)));
    }

    #[tokio::test]
    async fn test_rejects_foreign_parameters() {
        let ctx = context(JobType::WebhookHttpCall);
        let params = JobParameters::parse(
            JobType::WebhookHttpCall,
            json!({"url": "https://example.com/hook"}),
        )
        .unwrap();

        let err = handler().execute(&ctx, &params).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParameters(_)));
    }
}
