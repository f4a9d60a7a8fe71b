//! Daemon settings
//!
//! Layered, later sources win:
//! 1. Built-in defaults
//! 2. `config.toml` in the platform config dir (e.g. ~/.config/kairos/config.toml)
//! 3. File passed with `--config`
//! 4. `KAIROS_*` environment variables (`KAIROS_RPC_PORT=9600`)

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use kairos_api_rpc::server::{DEFAULT_RPC_HOST, DEFAULT_RPC_PORT};
use kairos_api_rpc::RpcServerConfig;
use kairos_core::application::constants::{
    DEFAULT_BACKOFF_FACTOR, DEFAULT_BREAKER_THRESHOLD, DEFAULT_EXECUTION_CEILING,
    DEFAULT_MAX_BACKOFF_MS, DEFAULT_MAX_CONCURRENT_EXECUTIONS, DEFAULT_MAX_DB_SIZE_MB,
    DEFAULT_MAX_JOB_TIMEOUT_SECS, DEFAULT_POLL_BATCH_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_RETENTION_DAYS, DEFAULT_SWEEP_INTERVAL, DEFAULT_TIMEOUT_GRACE, FINALIZE_MAX_RETRIES,
};
use kairos_core::application::{
    BackoffStrategy, CircuitBreakerConfig, OrchestratorConfig, SweeperConfig, TriggerConfig,
};
use kairos_infra_handlers::DEFAULT_ENV_ALLOWLIST;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_NAME: &str = "kairos";
const ENV_PREFIX: &str = "KAIROS";
const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Flat daemon settings. A `0` in an optional duration/age key disables that feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub db_path: String,
    pub rpc_host: String,
    pub rpc_port: u16,
    pub log_format: LogFormat,

    pub poll_interval_ms: u64,
    pub poll_batch_size: i64,
    pub max_concurrent_executions: usize,
    pub execution_ceiling_secs: u64,
    pub max_job_timeout_secs: i64,

    pub breaker_threshold: i32,
    pub breaker_cool_down_secs: u64,
    pub backoff_strategy: BackoffStrategy,
    pub backoff_factor: f64,
    pub max_backoff_ms: i64,

    pub sweep_interval_secs: u64,
    pub retention_days: i64,
    pub archive_after_days: i64,
    pub retry_reclaimed_jobs: bool,
    pub max_db_size_mb: f64,

    pub command_env_allowlist: Vec<String>,
    pub webhook_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            rpc_host: DEFAULT_RPC_HOST.to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_format: LogFormat::default(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            poll_batch_size: DEFAULT_POLL_BATCH_SIZE,
            max_concurrent_executions: DEFAULT_MAX_CONCURRENT_EXECUTIONS,
            execution_ceiling_secs: DEFAULT_EXECUTION_CEILING.as_secs(),
            max_job_timeout_secs: DEFAULT_MAX_JOB_TIMEOUT_SECS,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
            breaker_cool_down_secs: 0,
            backoff_strategy: BackoffStrategy::default(),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL.as_secs(),
            retention_days: DEFAULT_RETENTION_DAYS,
            archive_after_days: 0,
            retry_reclaimed_jobs: false,
            max_db_size_mb: DEFAULT_MAX_DB_SIZE_MB,
            command_env_allowlist: DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|s| s.to_string())
                .collect(),
            webhook_timeout_secs: DEFAULT_WEBHOOK_TIMEOUT_SECS,
        }
    }
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join("kairos.db"))
        .unwrap_or_else(|| PathBuf::from("./kairos.db"))
        .to_string_lossy()
        .to_string()
}

fn default_config_file() -> Option<PathBuf> {
    ProjectDirs::from("", "", APP_NAME).map(|p| p.config_dir().join("config.toml"))
}

fn non_zero(value: i64) -> Option<i64> {
    (value > 0).then_some(value)
}

impl DaemonConfig {
    /// Load settings from every layer
    pub fn load(cli_config_path: Option<&Path>) -> Result<Self> {
        Self::layered(default_config_file().as_deref(), cli_config_path, None)
    }

    /// `env` replaces the process environment when given (tests)
    fn layered(
        default_file: Option<&Path>,
        cli_file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = default_file {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        if let Some(path) = cli_file {
            builder = builder.add_source(
                File::from(path.to_path_buf())
                    .format(FileFormat::Toml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("command_env_allowlist")
                .source(env),
        );

        let settings: Self = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.execution_ceiling_secs as i64 <= self.max_job_timeout_secs {
            anyhow::bail!(
                "execution_ceiling_secs ({}) must be greater than max_job_timeout_secs ({})",
                self.execution_ceiling_secs,
                self.max_job_timeout_secs
            );
        }
        if self.poll_batch_size < 1 {
            anyhow::bail!("poll_batch_size must be at least 1");
        }
        if self.breaker_threshold < 1 {
            anyhow::bail!("breaker_threshold must be at least 1");
        }
        if self.backoff_factor < 1.0 {
            anyhow::bail!("backoff_factor must be at least 1.0");
        }
        Ok(())
    }

    /// db_path with `~` expanded
    pub fn expanded_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).into_owned())
    }

    pub fn rpc(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc_host.clone(),
            port: self.rpc_port,
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_executions: self.max_concurrent_executions,
            execution_ceiling: Duration::from_secs(self.execution_ceiling_secs),
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            finalize_max_retries: FINALIZE_MAX_RETRIES,
        }
    }

    pub fn trigger(&self) -> TriggerConfig {
        TriggerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.poll_batch_size,
        }
    }

    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            threshold: self.breaker_threshold,
            cool_down: (self.breaker_cool_down_secs > 0)
                .then(|| Duration::from_secs(self.breaker_cool_down_secs)),
        }
    }

    pub fn sweeper(&self) -> SweeperConfig {
        SweeperConfig {
            interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            retention_days: non_zero(self.retention_days),
            archive_after_days: non_zero(self.archive_after_days),
            retry_reclaimed_jobs: self.retry_reclaimed_jobs,
            max_db_size_mb: self.max_db_size_mb,
        }
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = DaemonConfig::layered(None, None, env(&[])).unwrap();
        assert_eq!(cfg.rpc_port, 9527);
        assert_eq!(cfg.rpc_host, "127.0.0.1");
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.backoff_strategy, BackoffStrategy::Fixed);
        assert!(!cfg.retry_reclaimed_jobs);
        assert!(cfg.command_env_allowlist.contains(&"PATH".to_string()));

        assert_eq!(cfg.circuit_breaker().cool_down, None);
        assert_eq!(cfg.sweeper().retention_days, Some(30));
        assert_eq!(cfg.sweeper().archive_after_days, None);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
            rpc_port = 9600
            log_format = "json"
            backoff_strategy = "exponential"
            archive_after_days = 7
            breaker_cool_down_secs = 300
            "#,
        );

        let cfg = DaemonConfig::layered(None, Some(file.path()), env(&[])).unwrap();
        assert_eq!(cfg.rpc_port, 9600);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.backoff_strategy, BackoffStrategy::Exponential);
        assert_eq!(cfg.sweeper().archive_after_days, Some(7));
        assert_eq!(
            cfg.circuit_breaker().cool_down,
            Some(Duration::from_secs(300))
        );
        // Untouched keys keep their defaults
        assert_eq!(cfg.poll_batch_size, DEFAULT_POLL_BATCH_SIZE);
    }

    #[test]
    fn test_cli_file_overrides_default_file() {
        let platform = toml_file("rpc_port = 9600\nmax_concurrent_executions = 2\n");
        let explicit = toml_file("rpc_port = 9700\n");

        let cfg =
            DaemonConfig::layered(Some(platform.path()), Some(explicit.path()), env(&[])).unwrap();
        assert_eq!(cfg.rpc_port, 9700);
        assert_eq!(cfg.max_concurrent_executions, 2);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = toml_file("rpc_port = 9600\n");
        let cfg = DaemonConfig::layered(
            None,
            Some(file.path()),
            env(&[
                ("KAIROS_RPC_PORT", "9800"),
                ("KAIROS_RETRY_RECLAIMED_JOBS", "true"),
                ("KAIROS_COMMAND_ENV_ALLOWLIST", "PATH,JAVA_HOME"),
            ]),
        )
        .unwrap();

        assert_eq!(cfg.rpc_port, 9800);
        assert!(cfg.sweeper().retry_reclaimed_jobs);
        assert_eq!(cfg.command_env_allowlist, vec!["PATH", "JAVA_HOME"]);
    }

    #[test]
    fn test_missing_default_file_is_ignored() {
        let cfg = DaemonConfig::layered(
            Some(Path::new("/nonexistent/kairos/config.toml")),
            None,
            env(&[]),
        );
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_missing_cli_file_is_an_error() {
        let cfg = DaemonConfig::layered(None, Some(Path::new("/nonexistent.toml")), env(&[]));
        assert!(cfg.is_err());
    }

    #[test]
    fn test_ceiling_must_exceed_job_timeout() {
        let file = toml_file("execution_ceiling_secs = 60\nmax_job_timeout_secs = 120\n");
        let err = DaemonConfig::layered(None, Some(file.path()), env(&[])).unwrap_err();
        assert!(err.to_string().contains("execution_ceiling_secs"));
    }

    #[test]
    fn test_zero_retention_disables_cleanup() {
        let cfg =
            DaemonConfig::layered(None, None, env(&[("KAIROS_RETENTION_DAYS", "0")])).unwrap();
        assert_eq!(cfg.sweeper().retention_days, None);
    }

    #[test]
    fn test_tilde_expansion() {
        let cfg = DaemonConfig {
            db_path: "~/kairos/test.db".to_string(),
            ..Default::default()
        };
        assert!(!cfg.expanded_db_path().starts_with("~"));
    }
}
