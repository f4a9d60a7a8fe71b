// Job Parameters - typed, per-family payloads validated at creation time

use crate::domain::error::{DomainError, Result};
use crate::domain::job_type::{JobFamily, JobType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum length of free-form string fields (names, commands, urls)
const MAX_FIELD_LEN: usize = 2048;

/// HTTP method accepted by webhook jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Output format of report jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Pdf,
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtlParameters {
    pub source: String,
    pub destination: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchParameters {
    pub dataset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<u32>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookParameters {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitoringParameters {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency_ms: Option<u64>,
}

/// Child process invocation shared by maintenance and custom jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParameters {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationParameters {
    pub channel: String,
    pub recipients: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReportParameters {
    pub report: String,
    #[serde(default)]
    pub format: ReportFormat,
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
}

/// Parsed job parameters.
///
/// Built once by [`JobParameters::parse`] when a job is created or updated, so
/// handlers never see a payload that does not match their family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JobParameters {
    Etl(EtlParameters),
    Batch(BatchParameters),
    Webhook(WebhookParameters),
    Monitoring(MonitoringParameters),
    Command(CommandParameters),
    Notification(NotificationParameters),
    Report(ReportParameters),
}

impl JobParameters {
    /// Parse and validate a raw payload against the schema of `job_type`
    pub fn parse(job_type: JobType, value: serde_json::Value) -> Result<Self> {
        let params = match job_type.family() {
            JobFamily::Etl => JobParameters::Etl(decode(job_type, value)?),
            JobFamily::Batch => JobParameters::Batch(decode(job_type, value)?),
            JobFamily::Webhook => JobParameters::Webhook(decode(job_type, value)?),
            JobFamily::Monitoring => JobParameters::Monitoring(decode(job_type, value)?),
            JobFamily::Maintenance | JobFamily::Custom => {
                JobParameters::Command(decode(job_type, value)?)
            }
            JobFamily::Notification => JobParameters::Notification(decode(job_type, value)?),
            JobFamily::Report => JobParameters::Report(decode(job_type, value)?),
        };

        params
            .validate()
            .map_err(|reason| DomainError::InvalidParameters {
                job_type: job_type.to_string(),
                reason,
            })?;

        Ok(params)
    }

    /// Whether these parameters belong to the schema of `job_type`
    pub fn matches(&self, job_type: JobType) -> bool {
        matches!(
            (self, job_type.family()),
            (JobParameters::Etl(_), JobFamily::Etl)
                | (JobParameters::Batch(_), JobFamily::Batch)
                | (JobParameters::Webhook(_), JobFamily::Webhook)
                | (JobParameters::Monitoring(_), JobFamily::Monitoring)
                | (JobParameters::Command(_), JobFamily::Maintenance)
                | (JobParameters::Command(_), JobFamily::Custom)
                | (JobParameters::Notification(_), JobFamily::Notification)
                | (JobParameters::Report(_), JobFamily::Report)
        )
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Untagged serialization of plain structs cannot fail
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match self {
            JobParameters::Etl(p) => {
                require_text("source", &p.source)?;
                require_text("destination", &p.destination)?;
                if p.batch_size == Some(0) {
                    return Err("batch_size must be greater than 0".into());
                }
            }
            JobParameters::Batch(p) => {
                require_text("dataset", &p.dataset)?;
                if p.chunk_size == Some(0) {
                    return Err("chunk_size must be greater than 0".into());
                }
            }
            JobParameters::Webhook(p) => {
                require_http_url("url", &p.url)?;
                if let Some(status) = p.expected_status {
                    require_status(status)?;
                }
                if p.headers.keys().any(|k| k.trim().is_empty()) {
                    return Err("header names must not be empty".into());
                }
            }
            JobParameters::Monitoring(p) => {
                require_http_url("target", &p.target)?;
                if let Some(status) = p.expected_status {
                    require_status(status)?;
                }
            }
            JobParameters::Command(p) => {
                require_text("command", &p.command)?;
                if p.args.iter().any(|a| a.len() > MAX_FIELD_LEN) {
                    return Err("argument too long".into());
                }
            }
            JobParameters::Notification(p) => {
                require_text("channel", &p.channel)?;
                require_text("message", &p.message)?;
                if p.recipients.is_empty() {
                    return Err("recipients must not be empty".into());
                }
                for recipient in &p.recipients {
                    require_text("recipient", recipient)?;
                }
            }
            JobParameters::Report(p) => {
                require_text("report", &p.report)?;
            }
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(job_type: JobType, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| DomainError::InvalidParameters {
        job_type: job_type.to_string(),
        reason: e.to_string(),
    })
}

fn require_text(field: &str, value: &str) -> std::result::Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{} must not be empty", field));
    }
    if value.len() > MAX_FIELD_LEN {
        return Err(format!("{} too long (max {} bytes)", field, MAX_FIELD_LEN));
    }
    Ok(())
}

fn require_http_url(field: &str, value: &str) -> std::result::Result<(), String> {
    require_text(field, value)?;
    let rest = value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .ok_or_else(|| format!("{} must be an http(s) URL", field))?;
    if rest.is_empty() || rest.starts_with('/') {
        return Err(format!("{} has no host", field));
    }
    Ok(())
}

fn require_status(status: u16) -> std::result::Result<(), String> {
    if !(100..=599).contains(&status) {
        return Err(format!("expected_status {} is not an HTTP status", status));
    }
    Ok(())
}
