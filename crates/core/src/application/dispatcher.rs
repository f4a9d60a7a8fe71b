// Type Dispatcher - job type to handler
use crate::domain::{DomainError, JobFamily, JobType};
use crate::port::JobHandler;
use std::sync::Arc;

/// One handler slot per job family
///
/// The slot lookup is an exhaustive `match`, so a new family does not compile
/// until it has a slot here.
#[derive(Clone, Default)]
pub struct TypeDispatcher {
    etl: Option<Arc<dyn JobHandler>>,
    batch: Option<Arc<dyn JobHandler>>,
    webhook: Option<Arc<dyn JobHandler>>,
    monitoring: Option<Arc<dyn JobHandler>>,
    maintenance: Option<Arc<dyn JobHandler>>,
    notification: Option<Arc<dyn JobHandler>>,
    report: Option<Arc<dyn JobHandler>>,
    custom: Option<Arc<dyn JobHandler>>,
}

impl TypeDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for every type of `family` (replaces any previous one)
    pub fn with_handler(mut self, family: JobFamily, handler: Arc<dyn JobHandler>) -> Self {
        *self.slot_mut(family) = Some(handler);
        self
    }

    /// Handler for `job_type`
    ///
    /// # Errors
    /// DomainError::UnsupportedJobType if the family has no handler
    pub fn resolve(&self, job_type: JobType) -> Result<Arc<dyn JobHandler>, DomainError> {
        self.slot(job_type.family())
            .clone()
            .ok_or_else(|| DomainError::UnsupportedJobType(job_type.to_string()))
    }

    pub fn supports(&self, job_type: JobType) -> bool {
        self.slot(job_type.family()).is_some()
    }

    pub fn registered_families(&self) -> Vec<JobFamily> {
        JobFamily::ALL
            .into_iter()
            .filter(|f| self.slot(*f).is_some())
            .collect()
    }

    fn slot(&self, family: JobFamily) -> &Option<Arc<dyn JobHandler>> {
        match family {
            JobFamily::Etl => &self.etl,
            JobFamily::Batch => &self.batch,
            JobFamily::Webhook => &self.webhook,
            JobFamily::Monitoring => &self.monitoring,
            JobFamily::Maintenance => &self.maintenance,
            JobFamily::Notification => &self.notification,
            JobFamily::Report => &self.report,
            JobFamily::Custom => &self.custom,
        }
    }

    fn slot_mut(&mut self, family: JobFamily) -> &mut Option<Arc<dyn JobHandler>> {
        match family {
            JobFamily::Etl => &mut self.etl,
            JobFamily::Batch => &mut self.batch,
            JobFamily::Webhook => &mut self.webhook,
            JobFamily::Monitoring => &mut self.monitoring,
            JobFamily::Maintenance => &mut self.maintenance,
            JobFamily::Notification => &mut self.notification,
            JobFamily::Report => &mut self.report,
            JobFamily::Custom => &mut self.custom,
        }
    }
}

impl std::fmt::Debug for TypeDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDispatcher")
            .field("families", &self.registered_families())
            .finish()
    }
}
