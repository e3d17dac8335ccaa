//! Job scheduling, dispatch and execution for the loch job platform.
//!
//! The scheduler owns the persisted cron triggers and fires them on a
//! background task. Every invocation goes through the `JobRunner`, which
//! takes the job's advisory lock and records the run in the status store.
//! Workers decouple inbound requests from execution with a local queue.

pub mod chain;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod launcher;
pub mod program;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;

pub use chain::{ChainedJob, StepState};
pub use context::{SchedulerContext, Stores};
pub use dispatch::{DispatchJob, Dispatcher};
pub use error::{SchedulerError, SchedulerResult};
pub use launcher::{LaunchMode, Launcher};
pub use program::{JOB_ARGS_ENV, JOB_ID_ENV, ProgramJob};
pub use queue::ExecutionQueue;
pub use registry::{JobDefinition, JobRegistry};
pub use runner::{Invocation, JobRunner};
pub use scheduler::{InitReport, LOCK_ID_ARG, ScheduleEntry, Scheduler};
