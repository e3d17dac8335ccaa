//! Repository traits and implementations.

pub mod lock;
pub mod schedule;
pub mod status;

pub use lock::{AdvisoryLocks, LockLease, PgAdvisoryLocks};
pub use schedule::{PgScheduleRepo, ScheduleRepo};
pub use status::{JobRunRecord, JobStatusRepo, PgJobStatusRepo};
