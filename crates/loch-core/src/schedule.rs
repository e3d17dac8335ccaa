//! Persisted schedule records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CronSpec, JobArgs, JobId};

/// What a scheduled job runs: one job class or an ordered chain of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "components", rename_all = "snake_case")]
pub enum JobTarget {
    Single(String),
    Chain(Vec<String>),
}

impl JobTarget {
    /// Job class names in execution order.
    pub fn components(&self) -> Vec<&str> {
        match self {
            JobTarget::Single(name) => vec![name.as_str()],
            JobTarget::Chain(steps) => steps.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_chain(&self) -> bool {
        matches!(self, JobTarget::Chain(_))
    }
}

/// A persisted cron trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: JobId,
    pub target: JobTarget,
    /// The configured trigger. Kept while paused so it can be described.
    pub trigger: CronSpec,
    /// Bound keyword options, never containing the lock id.
    pub options: JobArgs,
    pub lock_id: Option<i64>,
    /// `None` while paused.
    pub next_run_time: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    pub fn is_paused(&self) -> bool {
        self.next_run_time.is_none()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_run_time.is_some_and(|t| t <= now)
    }
}
