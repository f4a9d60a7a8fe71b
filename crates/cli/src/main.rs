//! Kairos CLI - operator interface to the Kairos Control API

mod output;
mod rpc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Map, Value};

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:9527";

#[derive(Parser)]
#[command(name = "kairos")]
#[command(about = "Kairos job engine CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// RPC server URL
    #[arg(long, global = true, env = "KAIROS_RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// Print raw JSON instead of tables
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a job
    Create(CreateArgs),

    /// Show one job
    Get { job_id: String },

    /// List jobs, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        offset: Option<i64>,
    },

    /// Count jobs matching the filters
    Count {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Patch a CREATED or SCHEDULED job
    Update {
        job_id: String,
        /// Fields to change as a JSON object, e.g. '{"priority": 80}'
        #[arg(long)]
        patch: String,
    },

    /// Delete a job and its history
    Delete { job_id: String },

    /// Move a CREATED job to SCHEDULED
    Schedule { job_id: String },

    /// Execute a job now
    Run { job_id: String },

    /// Cancel a job
    Cancel { job_id: String },

    /// Execution history of a job
    History {
        job_id: String,
        #[arg(short = 'n', long)]
        limit: Option<i64>,
    },

    /// Jobs due for execution
    Ready {
        #[arg(long)]
        limit: Option<i64>,
    },

    /// RUNNING jobs past their deadline
    TimedOut,

    /// Due jobs that already failed at least once
    RetryReady {
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Execution statistics
    Stats {
        /// Only executions started at or after this epoch-ms timestamp
        #[arg(long)]
        since: Option<i64>,
        /// Break the numbers down per job type
        #[arg(long)]
        by_type: bool,
    },

    /// Close circuit breakers (all open ones when no id is given)
    ResetBreakers { job_ids: Vec<String> },

    /// Delete terminal jobs older than N days
    Cleanup {
        #[arg(long)]
        days: i64,
    },

    /// Archive terminal jobs older than N days
    Archive {
        #[arg(long)]
        days: i64,
    },

    /// Show engine health
    Health,
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    name: String,

    /// Job type (e.g. WEBHOOK_HTTP_CALL, MAINTENANCE_CLEANUP)
    #[arg(short = 't', long = "type")]
    job_type: String,

    #[arg(long)]
    group: Option<String>,

    /// Type-specific parameters as JSON
    #[arg(long, default_value = "{}")]
    params: String,

    /// Run once at this epoch-ms timestamp
    #[arg(long, group = "when")]
    at: Option<i64>,

    /// Run every N seconds
    #[arg(long, group = "when")]
    every: Option<i64>,

    /// Cron expression (5 or 6 fields)
    #[arg(long, group = "when")]
    cron: Option<String>,

    /// IANA time zone for --cron
    #[arg(long, requires = "cron")]
    tz: Option<String>,

    #[arg(short, long)]
    priority: Option<i32>,

    #[arg(long)]
    max_attempts: Option<i32>,

    #[arg(long)]
    timeout: Option<i64>,

    #[arg(long)]
    backoff_ms: Option<i64>,

    /// Leave the job CREATED instead of scheduling it
    #[arg(long)]
    no_schedule: bool,
}

#[derive(Args, Default)]
struct FilterArgs {
    /// Substring of the job name
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    group: Option<String>,
    #[arg(short = 't', long = "type")]
    job_type: Option<String>,
    #[arg(short, long)]
    status: Option<String>,
    #[arg(short, long)]
    priority: Option<i32>,
    /// Created at or after this epoch-ms timestamp
    #[arg(long)]
    since: Option<i64>,
}

impl FilterArgs {
    fn to_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        insert_opt(&mut params, "name", self.name.clone());
        insert_opt(&mut params, "group", self.group.clone());
        insert_opt(&mut params, "job_type", self.job_type.clone());
        insert_opt(&mut params, "status", self.status.clone());
        insert_opt(&mut params, "priority", self.priority);
        insert_opt(&mut params, "created_since", self.since);
        params
    }
}

impl CreateArgs {
    fn schedule(&self) -> Result<Value> {
        match (self.at, self.every, &self.cron) {
            (Some(at), None, None) => Ok(json!({"kind": "ONCE", "at": at})),
            (None, Some(every), None) => Ok(json!({"kind": "INTERVAL", "every_seconds": every})),
            (None, None, Some(expr)) => {
                let mut schedule = json!({"kind": "CRON", "expression": expr});
                if let Some(tz) = &self.tz {
                    schedule["timezone"] = json!(tz);
                }
                Ok(schedule)
            }
            _ => anyhow::bail!("exactly one of --at, --every or --cron is required"),
        }
    }

    fn to_params(&self) -> Result<Value> {
        let parameters: Value =
            serde_json::from_str(&self.params).context("Invalid JSON in --params")?;

        let mut params = Map::new();
        params.insert("name".into(), json!(self.name));
        params.insert("job_type".into(), json!(self.job_type));
        params.insert("parameters".into(), parameters);
        params.insert("schedule".into(), self.schedule()?);
        params.insert("schedule_now".into(), json!(!self.no_schedule));
        insert_opt(&mut params, "group", self.group.clone());
        insert_opt(&mut params, "priority", self.priority);
        insert_opt(&mut params, "max_attempts", self.max_attempts);
        insert_opt(&mut params, "timeout_seconds", self.timeout);
        insert_opt(&mut params, "backoff_delay_ms", self.backoff_ms);
        Ok(Value::Object(params))
    }
}

fn insert_opt<T: Into<Value>>(params: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        params.insert(key.to_string(), v.into());
    }
}

fn limit_params(limit: Option<i64>) -> Value {
    let mut params = Map::new();
    insert_opt(&mut params, "limit", limit);
    Value::Object(params)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = rpc::RpcClient::new(&cli.rpc_url);
    let out = output::Printer::new(cli.json);

    match cli.command {
        Commands::Create(args) => {
            let job = client.call("jobs.create.v1", args.to_params()?).await?;
            out.success("Job created");
            out.job(&job)?;
        }

        Commands::Get { job_id } => {
            let job = client.call("jobs.get.v1", json!({ "job_id": job_id })).await?;
            out.job(&job)?;
        }

        Commands::List {
            filter,
            limit,
            offset,
        } => {
            let mut params = filter.to_params();
            insert_opt(&mut params, "limit", limit);
            insert_opt(&mut params, "offset", offset);
            let jobs = client.call("jobs.list.v1", Value::Object(params)).await?;
            out.jobs(&jobs)?;
        }

        Commands::Count { filter } => {
            let result = client
                .call("jobs.count.v1", Value::Object(filter.to_params()))
                .await?;
            out.value(&result, || println!("{}", result["count"]));
        }

        Commands::Update { job_id, patch } => {
            let patch: Value = serde_json::from_str(&patch).context("Invalid JSON in --patch")?;
            let Value::Object(mut params) = patch else {
                anyhow::bail!("--patch must be a JSON object");
            };
            params.insert("job_id".into(), json!(job_id));
            let job = client.call("jobs.update.v1", Value::Object(params)).await?;
            out.success("Job updated");
            out.job(&job)?;
        }

        Commands::Delete { job_id } => {
            let result = client
                .call("jobs.delete.v1", json!({ "job_id": job_id }))
                .await?;
            out.value(&result, || out.success(&format!("Job {} deleted", job_id)));
        }

        Commands::Schedule { job_id } => {
            let job = client
                .call("jobs.schedule.v1", json!({ "job_id": job_id }))
                .await?;
            out.success("Job scheduled");
            out.job(&job)?;
        }

        Commands::Run { job_id } => {
            let job = client
                .call("jobs.execute_now.v1", json!({ "job_id": job_id }))
                .await?;
            out.success("Execution dispatched");
            out.job(&job)?;
        }

        Commands::Cancel { job_id } => {
            let job = client
                .call("jobs.cancel.v1", json!({ "job_id": job_id }))
                .await?;
            if job["status"] == "CANCELLED" {
                out.success(&format!("Job {} cancelled", job_id));
            } else {
                out.note(&format!(
                    "Cancel requested; job {} stops when its current attempt ends",
                    job_id
                ));
            }
            out.job(&job)?;
        }

        Commands::History { job_id, limit } => {
            let mut params = Map::new();
            params.insert("job_id".into(), json!(job_id));
            insert_opt(&mut params, "limit", limit);
            let records = client.call("jobs.history.v1", Value::Object(params)).await?;
            out.executions(&records)?;
        }

        Commands::Ready { limit } => {
            let jobs = client.call("jobs.ready.v1", limit_params(limit)).await?;
            out.jobs(&jobs)?;
        }

        Commands::TimedOut => {
            let jobs = client.call("jobs.timed_out.v1", json!({})).await?;
            out.jobs(&jobs)?;
        }

        Commands::RetryReady { limit } => {
            let jobs = client.call("jobs.retry_ready.v1", limit_params(limit)).await?;
            out.jobs(&jobs)?;
        }

        Commands::Stats { since, by_type } => {
            let mut params = Map::new();
            insert_opt(&mut params, "since", since);
            if by_type {
                let stats = client
                    .call("stats.by_type.v1", Value::Object(params))
                    .await?;
                out.type_stats(&stats)?;
            } else {
                let stats = client
                    .call("stats.overall.v1", Value::Object(params))
                    .await?;
                out.stats(&stats);
            }
        }

        Commands::ResetBreakers { job_ids } => {
            let params = if job_ids.is_empty() {
                json!({})
            } else {
                json!({ "job_ids": job_ids })
            };
            let result = client.call("admin.reset_breakers.v1", params).await?;
            out.value(&result, || {
                out.success(&format!("{} circuit breaker(s) closed", result["reset"]))
            });
        }

        Commands::Cleanup { days } => {
            let result = client
                .call("admin.cleanup.v1", json!({ "days": days }))
                .await?;
            out.value(&result, || {
                out.success(&format!("{} job(s) deleted", result["deleted"]))
            });
        }

        Commands::Archive { days } => {
            let result = client
                .call("admin.archive.v1", json!({ "days": days }))
                .await?;
            out.value(&result, || {
                out.success(&format!("{} job(s) archived", result["archived"]))
            });
        }

        Commands::Health => match client.call("admin.health.v1", json!({})).await {
            Ok(health) => out.health(&cli.rpc_url, &health),
            Err(e) => {
                println!("{}", "System Status".cyan().bold());
                println!("  {} {}", "Status:".bold(), "UNREACHABLE".red());
                println!("  {} {}", "Error:".bold(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(extra: &[&str]) -> CreateArgs {
        let mut argv = vec!["kairos", "create", "--name", "nightly", "-t", "CUSTOM"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Create(args) => args,
            _ => panic!("expected create"),
        }
    }

    #[test]
    fn test_interval_schedule() {
        let args = create(&["--every", "30"]);
        assert_eq!(
            args.schedule().unwrap(),
            json!({"kind": "INTERVAL", "every_seconds": 30})
        );
    }

    #[test]
    fn test_cron_schedule_with_timezone() {
        let args = create(&["--cron", "0 3 * * *", "--tz", "Europe/Berlin"]);
        assert_eq!(
            args.schedule().unwrap(),
            json!({"kind": "CRON", "expression": "0 3 * * *", "timezone": "Europe/Berlin"})
        );
    }

    #[test]
    fn test_schedule_is_required() {
        assert!(create(&[]).schedule().is_err());
    }

    #[test]
    fn test_conflicting_schedules_rejected_by_parser() {
        let argv = [
            "kairos", "create", "--name", "x", "-t", "CUSTOM", "--at", "1", "--every", "5",
        ];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn test_create_params_skip_unset_fields() {
        let args = create(&["--at", "1700000000000", "--params", r#"{"command":"true"}"#]);
        let params = args.to_params().unwrap();

        assert_eq!(params["parameters"]["command"], "true");
        assert_eq!(params["schedule_now"], true);
        assert!(params.get("priority").is_none());
        assert!(params.get("group").is_none());
    }

    #[test]
    fn test_filter_uses_wire_names() {
        let filter = FilterArgs {
            job_type: Some("CUSTOM".into()),
            since: Some(5),
            ..Default::default()
        };
        let params = filter.to_params();
        assert_eq!(params["job_type"], "CUSTOM");
        assert_eq!(params["created_since"], 5);
        assert!(!params.contains_key("name"));
    }
}
