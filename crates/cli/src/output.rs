// Terminal rendering of RPC results

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Deserialize;
use serde_json::Value;
use tabled::{Table, Tabled};

#[derive(Deserialize, Tabled)]
struct JobRow {
    id: String,
    name: String,
    job_type: String,
    status: String,
    priority: i32,
    attempts: i32,
    #[tabled(display_with = "display_opt")]
    next_execution_at: Option<i64>,
}

#[derive(Deserialize, Tabled)]
struct ExecutionRow {
    attempt: i32,
    outcome: String,
    started_at: i64,
    duration_ms: i64,
    #[tabled(display_with = "display_opt")]
    error_message: Option<String>,
}

#[derive(Tabled)]
struct TypeStatsRow {
    job_type: String,
    total_jobs: i64,
    executions: i64,
    successes: i64,
    failures: i64,
    timeouts: i64,
    open_breakers: i64,
}

fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub struct Printer {
    json: bool,
}

impl Printer {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn success(&self, message: &str) {
        if !self.json {
            println!("{}", format!("✓ {}", message).green().bold());
        }
    }

    pub fn note(&self, message: &str) {
        if !self.json {
            println!("{}", message.yellow());
        }
    }

    /// Raw JSON in --json mode, otherwise `human`
    pub fn value(&self, value: &Value, human: impl FnOnce()) {
        if self.json {
            self.raw(value);
        } else {
            human();
        }
    }

    pub fn job(&self, job: &Value) -> Result<()> {
        if self.json {
            self.raw(job);
            return Ok(());
        }

        let row: JobRow = serde_json::from_value(job.clone()).context("Unexpected job shape")?;
        println!("{}", Table::new(vec![row]));

        if let Some(err) = job["last_error"].as_str() {
            println!("  {} {}", "Last error:".bold(), err.red());
        }
        if job["circuit_breaker_open"].as_bool().unwrap_or(false) {
            println!("  {} {}", "Circuit breaker:".bold(), "OPEN".red());
        }
        Ok(())
    }

    pub fn jobs(&self, jobs: &Value) -> Result<()> {
        if self.json {
            self.raw(jobs);
            return Ok(());
        }

        let rows: Vec<JobRow> =
            serde_json::from_value(jobs.clone()).context("Unexpected job list shape")?;
        if rows.is_empty() {
            println!("{}", "No jobs".yellow());
        } else {
            println!("{}", Table::new(rows));
        }
        Ok(())
    }

    pub fn executions(&self, records: &Value) -> Result<()> {
        if self.json {
            self.raw(records);
            return Ok(());
        }

        let rows: Vec<ExecutionRow> =
            serde_json::from_value(records.clone()).context("Unexpected history shape")?;
        if rows.is_empty() {
            println!("{}", "No executions recorded".yellow());
        } else {
            println!("{}", Table::new(rows));
        }
        Ok(())
    }

    pub fn stats(&self, stats: &Value) {
        if self.json {
            self.raw(stats);
            return;
        }

        println!("{}", "Job Statistics".cyan().bold());
        println!("  {} {}", "Total jobs:".bold(), stats["total_jobs"]);
        if let Some(by_status) = stats["by_status"].as_object() {
            for (status, count) in by_status {
                println!("    {:<10} {}", status, count);
            }
        }
        println!("  {} {}", "Executions:".bold(), stats["executions"]);
        println!("  {} {}", "Successes:".bold(), stats["successes"].to_string().green());
        println!("  {} {}", "Failures:".bold(), stats["failures"].to_string().red());
        println!("  {} {}", "Timeouts:".bold(), stats["timeouts"]);
        match stats["avg_duration_ms"].as_f64() {
            Some(avg) => println!("  {} {:.1} ms", "Avg duration:".bold(), avg),
            None => println!("  {} -", "Avg duration:".bold()),
        }
        println!("  {} {}", "Open breakers:".bold(), stats["open_breakers"]);
    }

    pub fn type_stats(&self, stats: &Value) -> Result<()> {
        if self.json {
            self.raw(stats);
            return Ok(());
        }

        let entries = stats.as_array().context("Unexpected stats shape")?;
        let rows: Vec<TypeStatsRow> = entries
            .iter()
            .map(|e| {
                let s = &e["stats"];
                TypeStatsRow {
                    job_type: e["job_type"].as_str().unwrap_or("?").to_string(),
                    total_jobs: s["total_jobs"].as_i64().unwrap_or(0),
                    executions: s["executions"].as_i64().unwrap_or(0),
                    successes: s["successes"].as_i64().unwrap_or(0),
                    failures: s["failures"].as_i64().unwrap_or(0),
                    timeouts: s["timeouts"].as_i64().unwrap_or(0),
                    open_breakers: s["open_breakers"].as_i64().unwrap_or(0),
                }
            })
            .collect();

        if rows.is_empty() {
            println!("{}", "No jobs".yellow());
        } else {
            println!("{}", Table::new(rows));
        }
        Ok(())
    }

    pub fn health(&self, rpc_url: &str, health: &Value) {
        if self.json {
            self.raw(health);
            return;
        }

        println!("{}", "System Status".cyan().bold());
        println!();
        println!("  {} {}", "RPC URL:".bold(), rpc_url);
        let status = if health["healthy"].as_bool().unwrap_or(false) {
            "HEALTHY".green()
        } else {
            "DEGRADED".red()
        };
        println!("  {} {}", "Status:".bold(), status);
        println!("  {} {}", "Version:".bold(), health["version"]);
        println!("  {} {}", "In flight:".bold(), health["in_flight_executions"]);
        println!("  {} {}", "Detached:".bold(), health["detached_executions"]);
        println!("  {} {}", "Handlers:".bold(), health["registered_families"]);

        let storage = &health["storage"];
        if storage.is_object() {
            println!();
            println!("  {} {}", "Jobs:".bold(), storage["job_count"]);
            println!("  {} {}", "Terminal:".bold(), storage["terminal_job_count"]);
            println!("  {} {}", "Executions:".bold(), storage["execution_count"]);
            println!("  {} {}", "Archived:".bold(), storage["archived_job_count"]);
            let db_mb = storage["db_size_mb"].as_f64().unwrap_or(0.0);
            println!("  {} {:.2} MB", "DB Size:".bold(), db_mb);
        }
    }

    fn raw(&self, value: &Value) {
        match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{}", text),
            Err(_) => println!("{}", value),
        }
    }
}
