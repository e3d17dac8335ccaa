//! KDL configuration parsing for the loch job platform.
//!
//! This crate handles:
//! - Instance settings (loch.kdl)
//! - Per-job cron schedules and bound options
//! - Master/worker role detection

pub mod error;
pub mod role;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use role::{ROLE_ENV, Role};
pub use system::{
    Credentials, JobBody, QueueSettings, ScheduleSetting, SchedulingSettings, Settings,
    WorkerSettings, load_settings, parse_settings,
};
