//! The job unit contract.
//!
//! A job is anything with a stable name and an async `run` body. The runtime
//! wraps every invocation with advisory locking and status recording, so job
//! bodies only deal with their own work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::id::{generate_run_id, snake_case};

/// Keyword options bound to a job invocation.
pub type JobArgs = serde_json::Map<String, serde_json::Value>;

/// Maximum stored length of a run's details column.
pub const MAX_DETAILS_LEN: usize = 4096;

/// Errors a job body can report.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// A handled, reportable failure.
    #[error("{0}")]
    Failed(String),

    /// Anything the job did not anticipate, including panics.
    #[error("unexpected error: {0}")]
    Unexpected(String),

    /// The job's advisory lock is held by another session.
    #[error("job {0} is already running")]
    Locked(String),
}

impl JobError {
    pub fn failed(message: impl fmt::Display) -> Self {
        JobError::Failed(message.to_string())
    }

    pub fn unexpected(err: impl fmt::Display) -> Self {
        JobError::Unexpected(err.to_string())
    }

    /// Terminal status this error is recorded as.
    pub fn status(&self) -> RunStatus {
        match self {
            JobError::Failed(_) | JobError::Locked(_) => RunStatus::Failed,
            JobError::Unexpected(_) => RunStatus::Errored,
        }
    }
}

/// Result of a job body.
pub type JobOutcome = std::result::Result<String, JobError>;

/// Lifecycle status of a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Started,
    Succeeded,
    Failed,
    Errored,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Started)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "started" => Ok(RunStatus::Started),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "errored" => Ok(RunStatus::Errored),
            other => Err(crate::Error::InvalidInput(format!(
                "unknown run status: {}",
                other
            ))),
        }
    }
}

/// Everything a job body receives for one run.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Id of the status row for this run.
    pub run_id: String,
    /// Advisory lock held for the duration of the run, if any.
    pub lock_id: Option<i64>,
    /// Bound keyword options.
    pub args: JobArgs,
}

impl JobContext {
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// Trait for executable job units.
#[async_trait]
pub trait Job: Send + Sync {
    /// Stable name of this job type, e.g. `SyncCanvasSnapshots`.
    fn name(&self) -> &str;

    /// Command name used to address the job over HTTP.
    fn command(&self) -> String {
        snake_case(self.name())
    }

    /// Id for a new status row.
    fn generate_job_id(&self) -> String {
        generate_run_id(self.name())
    }

    /// Whether the body only forwards to another instance, which takes the
    /// advisory lock itself.
    fn runs_remotely(&self) -> bool {
        false
    }

    /// The job body. The returned string is stored as the run's details.
    async fn run(&self, ctx: &JobContext) -> JobOutcome;
}

/// Truncate a details string to the stored length on a char boundary.
pub fn truncate_details(details: &str) -> &str {
    if details.len() <= MAX_DETAILS_LEN {
        return details;
    }
    let mut end = MAX_DETAILS_LEN;
    while !details.is_char_boundary(end) {
        end -= 1;
    }
    &details[..end]
}
