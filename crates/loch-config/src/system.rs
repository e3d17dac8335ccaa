//! Instance settings parsing.
//!
//! ```kdl
//! scheduling enabled=#true stalled-after-hours=12 tick-seconds=1
//! queue enabled=#false threads=5
//! worker host="worker.loch.internal" timeout-seconds=30
//! credentials username="loch" password="secret"
//! instance "master-1"
//! database url="postgres://loch@127.0.0.1:5432/loch"
//! server bind="0.0.0.0:3000"
//!
//! schedule {
//!     JOB_SYNC_CANVAS_SNAPSHOTS hour=1 minute=0
//!     JOB_GENERATE_CURRENT_TERM_FEEDS hour=4 minute=30 {
//!         term_id "2248"
//!     }
//!     JOB_REFRESH_BOAC_CACHE
//! }
//!
//! jobs {
//!     program "SyncCanvasSnapshots" path="/opt/loch/bin/sync-canvas-snapshots"
//!     remote "RefreshBoacCache" command="refresh_boac_cache"
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use chrono::{TimeDelta, Utc};
use kdl::{KdlDocument, KdlNode, KdlValue};
use loch_core::{CronSpec, JobArgs, JobId};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Instance-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub scheduling: SchedulingSettings,
    pub queue: QueueSettings,
    pub worker: WorkerSettings,
    /// Shared Basic-Auth pair for job endpoints and dispatches.
    pub credentials: Credentials,
    /// Identifier recorded on every job run started by this process.
    pub instance_id: String,
    pub database_url: Option<String>,
    pub bind: String,
    /// Configured triggers keyed by job id. Jobs absent here are not scheduled.
    pub schedules: BTreeMap<JobId, ScheduleSetting>,
    /// Job class bindings.
    pub job_bodies: Vec<JobBody>,
}

#[derive(Debug, Clone)]
pub struct SchedulingSettings {
    /// True on the master node.
    pub enabled: bool,
    /// A run still `started` after this many hours is reported as stalled.
    pub stalled_after_hours: i64,
    pub tick_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// True on worker nodes.
    pub enabled: bool,
    pub threads: usize,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// `host[:port]` of the worker; `localhost` is addressed over plain http.
    pub host: String,
    pub timeout_seconds: u64,
}

#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn matches(&self, username: &str, password: &str) -> bool {
        !self.username.is_empty() && self.username == username && self.password == password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A configured trigger with its bound options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleSetting {
    /// Empty means install paused.
    pub trigger: CronSpec,
    pub options: JobArgs,
}

/// Where the body of a job class comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum JobBody {
    /// Run an external program on this instance.
    Program {
        class: String,
        path: String,
        args: Vec<String>,
    },
    /// Forward to the worker host.
    Remote { class: String, command: String },
}

impl JobBody {
    pub fn class(&self) -> &str {
        match self {
            JobBody::Program { class, .. } | JobBody::Remote { class, .. } => class,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            scheduling: SchedulingSettings {
                enabled: true,
                stalled_after_hours: 12,
                tick_seconds: 1,
            },
            queue: QueueSettings {
                enabled: false,
                threads: 5,
            },
            worker: WorkerSettings {
                host: "localhost:3000".to_string(),
                timeout_seconds: 30,
            },
            credentials: Credentials::default(),
            instance_id: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
            database_url: None,
            bind: "0.0.0.0:3000".to_string(),
            schedules: BTreeMap::new(),
            job_bodies: Vec::new(),
        }
    }
}

/// Read and parse a settings file.
pub fn load_settings(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Parse settings from KDL text. Unset values keep their defaults.
pub fn parse_settings(kdl: &str) -> ConfigResult<Settings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = Settings::default();

    for node in doc.nodes() {
        match node.name().value() {
            "scheduling" => {
                if let Some(enabled) = get_bool_prop(node, "enabled") {
                    settings.scheduling.enabled = enabled;
                }
                if let Some(hours) = get_int_prop(node, "stalled-after-hours")? {
                    settings.scheduling.stalled_after_hours = stalled_window(hours)?;
                }
                if let Some(secs) = get_int_prop(node, "tick-seconds")? {
                    settings.scheduling.tick_seconds = positive(secs, "scheduling tick-seconds")?;
                }
            }
            "queue" => {
                if let Some(enabled) = get_bool_prop(node, "enabled") {
                    settings.queue.enabled = enabled;
                }
                if let Some(threads) = get_int_prop(node, "threads")? {
                    settings.queue.threads = positive::<usize>(threads, "queue threads")?;
                }
            }
            "worker" => {
                settings.worker.host = get_string_prop(node, "host")
                    .ok_or_else(|| ConfigError::MissingField("worker host".to_string()))?;
                if let Some(secs) = get_int_prop(node, "timeout-seconds")? {
                    settings.worker.timeout_seconds = positive(secs, "worker timeout-seconds")?;
                }
            }
            "credentials" => {
                let username = get_string_prop(node, "username")
                    .ok_or_else(|| ConfigError::MissingField("credentials username".to_string()))?;
                let password = get_string_prop(node, "password")
                    .ok_or_else(|| ConfigError::MissingField("credentials password".to_string()))?;
                settings.credentials = Credentials::new(username, password);
            }
            "instance" => {
                settings.instance_id = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("instance id".to_string()))?;
            }
            "database" => {
                settings.database_url = get_string_prop(node, "url");
            }
            "server" => {
                if let Some(bind) = get_string_prop(node, "bind") {
                    settings.bind = bind;
                }
            }
            "schedule" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let id = JobId::new(child.name().value());
                        let setting = parse_schedule_entry(child)?;
                        if settings.schedules.insert(id.clone(), setting).is_some() {
                            return Err(ConfigError::Duplicate(format!("schedule for {}", id)));
                        }
                    }
                }
            }
            "jobs" => {
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        let body = parse_job_body(child)?;
                        if settings
                            .job_bodies
                            .iter()
                            .any(|b| b.class() == body.class())
                        {
                            return Err(ConfigError::Duplicate(format!(
                                "job body for {}",
                                body.class()
                            )));
                        }
                        settings.job_bodies.push(body);
                    }
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(settings)
}

fn parse_schedule_entry(node: &KdlNode) -> ConfigResult<ScheduleSetting> {
    let field = format!("schedule {}", node.name().value());
    let mut trigger = CronSpec::default();

    for entry in node.entries() {
        let Some(name) = entry.name() else {
            return Err(ConfigError::InvalidValue {
                field,
                message: "cron fields must be named, e.g. hour=1".to_string(),
            });
        };
        let value = cron_value(entry.value()).ok_or_else(|| ConfigError::InvalidValue {
            field: field.clone(),
            message: format!("'{}' must be a string or integer", name.value()),
        })?;
        trigger
            .set(name.value(), value)
            .map_err(|e| ConfigError::InvalidValue {
                field: field.clone(),
                message: e.to_string(),
            })?;
    }
    trigger.validate().map_err(|e| ConfigError::InvalidValue {
        field: field.clone(),
        message: e.to_string(),
    })?;
    if !trigger.is_empty() {
        let next = trigger.next_after(Utc::now()).map_err(|e| ConfigError::InvalidValue {
            field: field.clone(),
            message: e.to_string(),
        })?;
        if next.is_none() {
            return Err(ConfigError::InvalidValue {
                field,
                message: format!("{} never fires", trigger.describe()),
            });
        }
    }

    let mut options = JobArgs::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let value = child
                .entries()
                .iter()
                .find(|e| e.name().is_none())
                .map(|e| json_value(e.value()))
                .unwrap_or(serde_json::Value::Null);
            options.insert(child.name().value().to_string(), value);
        }
    }

    Ok(ScheduleSetting { trigger, options })
}

fn parse_job_body(node: &KdlNode) -> ConfigResult<JobBody> {
    let class = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField(format!("{} class name", node.name().value())))?;

    match node.name().value() {
        "program" => {
            let path = get_string_prop(node, "path")
                .ok_or_else(|| ConfigError::MissingField(format!("path for {}", class)))?;
            let mut args = Vec::new();
            if let Some(children) = node.children() {
                for child in children.nodes() {
                    if child.name().value() == "arg" {
                        args.extend(get_all_string_args(child));
                    }
                }
            }
            Ok(JobBody::Program { class, path, args })
        }
        "remote" => {
            let command = get_string_prop(node, "command")
                .ok_or_else(|| ConfigError::MissingField(format!("command for {}", class)))?;
            Ok(JobBody::Remote { class, command })
        }
        other => Err(ConfigError::InvalidValue {
            field: "jobs".to_string(),
            message: format!("unknown job body kind: {}", other),
        }),
    }
}

fn positive<T: TryFrom<i64>>(value: i64, field: &str) -> ConfigResult<T> {
    if value <= 0 {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("must be positive, got {}", value),
        });
    }
    T::try_from(value).map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        message: format!("out of range: {}", value),
    })
}

/// Hours before a `started` run counts as stalled; must fit a `TimeDelta`.
fn stalled_window(hours: i64) -> ConfigResult<i64> {
    let field = "scheduling stalled-after-hours";
    let hours = positive::<i64>(hours, field)?;
    if TimeDelta::try_hours(hours).is_none() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("out of range: {}", hours),
        });
    }
    Ok(hours)
}

fn cron_value(value: &KdlValue) -> Option<String> {
    value
        .as_string()
        .map(|s| s.to_string())
        .or_else(|| value.as_integer().map(|i| i.to_string()))
}

fn json_value(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        i64::try_from(i)
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string()))
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else if let Some(f) = value.as_float() {
        serde_json::json!(f)
    } else {
        serde_json::Value::Null
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_int_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<i64>> {
    match node.get(name) {
        None => Ok(None),
        Some(v) => v
            .as_integer()
            .and_then(|i| i64::try_from(i).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: name.to_string(),
                message: "expected an integer".to_string(),
            }),
    }
}
