//! Scheduler error types.

use loch_db::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no advisory lock id registered for {0}")]
    NoLockId(String),

    #[error("scheduling is disabled")]
    Disabled,

    #[error("store error: {0}")]
    Store(#[from] DbError),
}

impl SchedulerError {
    /// Whether the error was caused by the caller rather than the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::NotFound(_)
                | SchedulerError::InvalidTrigger(_)
                | SchedulerError::InvalidInput(_)
                | SchedulerError::NoLockId(_)
                | SchedulerError::Disabled
        )
    }
}

impl From<loch_core::Error> for SchedulerError {
    fn from(err: loch_core::Error) -> Self {
        match err {
            loch_core::Error::NotFound(msg) => SchedulerError::NotFound(msg),
            loch_core::Error::InvalidTrigger(msg) => SchedulerError::InvalidTrigger(msg),
            other => SchedulerError::InvalidInput(other.to_string()),
        }
    }
}

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
