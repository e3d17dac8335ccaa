//! Core job types and traits for the loch data-loch job platform.
//!
//! This crate contains:
//! - Job identifiers and run ids
//! - The `Job` trait every executable unit implements
//! - Cron trigger specifications
//! - Persisted schedule records
//! - The advisory lock registry

pub mod error;
pub mod id;
pub mod job;
pub mod lock;
pub mod schedule;
pub mod trigger;

pub use error::{Error, Result};
pub use id::{JobId, generate_run_id};
pub use job::{Job, JobArgs, JobContext, JobError, JobOutcome, RunStatus};
pub use lock::{ADVISORY_LOCK_IDS, lock_id_for};
pub use schedule::{JobTarget, ScheduledJob};
pub use trigger::CronSpec;
