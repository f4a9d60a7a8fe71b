// Job Type - closed set of job kinds

use crate::domain::error::DomainError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Job family. Every [`JobType`] belongs to exactly one family, and handlers
/// are registered per family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobFamily {
    Etl,
    Batch,
    Webhook,
    Monitoring,
    Maintenance,
    Notification,
    Report,
    Custom,
}

impl JobFamily {
    pub const ALL: [JobFamily; 8] = [
        JobFamily::Etl,
        JobFamily::Batch,
        JobFamily::Webhook,
        JobFamily::Monitoring,
        JobFamily::Maintenance,
        JobFamily::Notification,
        JobFamily::Report,
        JobFamily::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobFamily::Etl => "ETL",
            JobFamily::Batch => "BATCH",
            JobFamily::Webhook => "WEBHOOK",
            JobFamily::Monitoring => "MONITORING",
            JobFamily::Maintenance => "MAINTENANCE",
            JobFamily::Notification => "NOTIFICATION",
            JobFamily::Report => "REPORT",
            JobFamily::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for JobFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job Type
///
/// Adding a variant forces every `match` on it (dispatcher, parameter parser,
/// storage codec) to be updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    EtlDatabasePull,
    EtlApiPull,
    EtlFileImport,
    BatchDataProcessing,
    BatchCleanup,
    WebhookHttpCall,
    WebhookCallback,
    MonitoringHealthCheck,
    MonitoringMetricsCollection,
    MaintenanceCleanup,
    MaintenanceBackup,
    NotificationEmail,
    NotificationSlack,
    ReportGeneration,
    ReportExport,
    Custom,
}

impl JobType {
    pub const ALL: [JobType; 16] = [
        JobType::EtlDatabasePull,
        JobType::EtlApiPull,
        JobType::EtlFileImport,
        JobType::BatchDataProcessing,
        JobType::BatchCleanup,
        JobType::WebhookHttpCall,
        JobType::WebhookCallback,
        JobType::MonitoringHealthCheck,
        JobType::MonitoringMetricsCollection,
        JobType::MaintenanceCleanup,
        JobType::MaintenanceBackup,
        JobType::NotificationEmail,
        JobType::NotificationSlack,
        JobType::ReportGeneration,
        JobType::ReportExport,
        JobType::Custom,
    ];

    pub fn family(&self) -> JobFamily {
        match self {
            JobType::EtlDatabasePull | JobType::EtlApiPull | JobType::EtlFileImport => {
                JobFamily::Etl
            }
            JobType::BatchDataProcessing | JobType::BatchCleanup => JobFamily::Batch,
            JobType::WebhookHttpCall | JobType::WebhookCallback => JobFamily::Webhook,
            JobType::MonitoringHealthCheck | JobType::MonitoringMetricsCollection => {
                JobFamily::Monitoring
            }
            JobType::MaintenanceCleanup | JobType::MaintenanceBackup => JobFamily::Maintenance,
            JobType::NotificationEmail | JobType::NotificationSlack => JobFamily::Notification,
            JobType::ReportGeneration | JobType::ReportExport => JobFamily::Report,
            JobType::Custom => JobFamily::Custom,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::EtlDatabasePull => "ETL_DATABASE_PULL",
            JobType::EtlApiPull => "ETL_API_PULL",
            JobType::EtlFileImport => "ETL_FILE_IMPORT",
            JobType::BatchDataProcessing => "BATCH_DATA_PROCESSING",
            JobType::BatchCleanup => "BATCH_CLEANUP",
            JobType::WebhookHttpCall => "WEBHOOK_HTTP_CALL",
            JobType::WebhookCallback => "WEBHOOK_CALLBACK",
            JobType::MonitoringHealthCheck => "MONITORING_HEALTH_CHECK",
            JobType::MonitoringMetricsCollection => "MONITORING_METRICS_COLLECTION",
            JobType::MaintenanceCleanup => "MAINTENANCE_CLEANUP",
            JobType::MaintenanceBackup => "MAINTENANCE_BACKUP",
            JobType::NotificationEmail => "NOTIFICATION_EMAIL",
            JobType::NotificationSlack => "NOTIFICATION_SLACK",
            JobType::ReportGeneration => "REPORT_GENERATION",
            JobType::ReportExport => "REPORT_EXPORT",
            JobType::Custom => "CUSTOM",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnsupportedJobType(s.to_string()))
    }
}
