// Schedule - one-shot, interval or calendar recurrence

use crate::domain::error::{DomainError, Result};
use chrono::TimeZone;
use chrono_tz::Tz;
use croner::Cron;
use serde::{Deserialize, Serialize};

/// Smallest accepted interval between two runs (seconds)
pub const MIN_INTERVAL_SECONDS: i64 = 1;

/// Largest accepted interval (ten years)
pub const MAX_INTERVAL_SECONDS: i64 = 10 * 366 * 24 * 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    /// Run once at `at` (epoch ms)
    Once { at: i64 },
    /// Run every `every_seconds`, first run at `start_at` (or one interval after scheduling)
    Interval {
        every_seconds: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_at: Option<i64>,
    },
    /// Run on a cron expression (5 or 6 fields) in `timezone` (IANA, default UTC)
    Cron {
        expression: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl Schedule {
    pub fn once(at: i64) -> Self {
        Schedule::Once { at }
    }

    pub fn every(seconds: i64) -> Self {
        Schedule::Interval {
            every_seconds: seconds,
            start_at: None,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            expression: expression.into(),
            timezone: None,
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, Schedule::Once { .. })
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Schedule::Once { at } => {
                if *at < 0 {
                    return Err(DomainError::InvalidSchedule(format!(
                        "due timestamp {} is negative",
                        at
                    )));
                }
            }
            Schedule::Interval { every_seconds, .. } => {
                if !(MIN_INTERVAL_SECONDS..=MAX_INTERVAL_SECONDS).contains(every_seconds) {
                    return Err(DomainError::InvalidSchedule(format!(
                        "interval must be between {}s and {}s, got {}s",
                        MIN_INTERVAL_SECONDS, MAX_INTERVAL_SECONDS, every_seconds
                    )));
                }
            }
            Schedule::Cron {
                expression,
                timezone,
            } => {
                parse_cron(expression)?;
                parse_timezone(timezone.as_deref())?;
            }
        }
        Ok(())
    }

    /// First due time when a job becomes SCHEDULED at `now`
    pub fn first_occurrence(&self, now: i64) -> Result<i64> {
        match self {
            Schedule::Once { at } => Ok(*at),
            Schedule::Interval {
                every_seconds,
                start_at,
            } => match start_at {
                Some(at) => Ok(*at),
                None => interval_after(now, *every_seconds),
            },
            Schedule::Cron { .. } => self
                .next_occurrence(now)?
                .ok_or_else(|| DomainError::InvalidSchedule("cron never fires".into())),
        }
    }

    /// Next due time strictly after `after`; `None` once a one-shot schedule has run
    pub fn next_occurrence(&self, after: i64) -> Result<Option<i64>> {
        match self {
            Schedule::Once { .. } => Ok(None),
            Schedule::Interval { every_seconds, .. } => {
                interval_after(after, *every_seconds).map(Some)
            }
            Schedule::Cron {
                expression,
                timezone,
            } => {
                let cron = parse_cron(expression)?;
                let tz = parse_timezone(timezone.as_deref())?;
                let start = tz.timestamp_millis_opt(after).single().ok_or_else(|| {
                    DomainError::InvalidSchedule(format!("timestamp {} out of range", after))
                })?;
                let next = cron
                    .find_next_occurrence(&start, false)
                    .map_err(|e| DomainError::InvalidSchedule(format!("'{}': {}", expression, e)))?;
                Ok(Some(next.timestamp_millis()))
            }
        }
    }
}

fn interval_after(after: i64, every_seconds: i64) -> Result<i64> {
    every_seconds
        .checked_mul(1000)
        .and_then(|step| after.checked_add(step))
        .ok_or_else(|| {
            DomainError::InvalidSchedule(format!(
                "interval of {}s after {} is out of range",
                every_seconds, after
            ))
        })
}

fn parse_cron(expression: &str) -> Result<Cron> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|e| DomainError::InvalidSchedule(format!("'{}': {}", expression, e)))
}

fn parse_timezone(timezone: Option<&str>) -> Result<Tz> {
    match timezone {
        None => Ok(Tz::UTC),
        Some(name) => name
            .parse::<Tz>()
            .map_err(|_| DomainError::InvalidSchedule(format!("unknown timezone '{}'", name))),
    }
}
