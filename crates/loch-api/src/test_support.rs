//! Shared fixtures for route tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, header};
use axum::response::Response;
use base64::prelude::*;
use loch_config::{Credentials, ScheduleSetting, Settings};
use loch_core::{CronSpec, Job, JobArgs, JobContext, JobId, JobOutcome};
use loch_scheduler::{LaunchMode, Launcher, SchedulerContext, Stores};
use serde_json::Value;

use crate::AppState;
use crate::jobs::catalog;

pub const USERNAME: &str = "loch";
pub const PASSWORD: &str = "secret";

pub struct CountingJob {
    name: &'static str,
    calls: AtomicUsize,
}

impl CountingJob {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::Value::Object(ctx.args.clone()).to_string())
    }
}

pub struct Harness {
    pub state: AppState,
    pub sync: Arc<CountingJob>,
}

pub fn settings(scheduling: bool) -> Settings {
    let mut settings = Settings::default();
    settings.scheduling.enabled = scheduling;
    settings.credentials = Credentials::new(USERNAME, PASSWORD);
    let mut trigger = CronSpec::default();
    trigger.set("hour", "1").unwrap();
    trigger.set("minute", "0").unwrap();
    settings.schedules.insert(
        JobId::new("JOB_SYNC_CANVAS_SNAPSHOTS"),
        ScheduleSetting {
            trigger,
            options: JobArgs::new(),
        },
    );
    settings
}

pub async fn harness_with(settings: Settings) -> Harness {
    let sync = Arc::new(CountingJob::new("SyncCanvasSnapshots"));
    let mut registry = loch_scheduler::JobRegistry::new();
    registry
        .register(sync.clone())
        .register(Arc::new(CountingJob::new("CreateCanvasSchema")));
    for definition in catalog() {
        registry.define(definition);
    }

    let stores = Stores::in_memory();
    let launcher = Launcher::new(stores.runner("test-host"), LaunchMode::Inline);
    let ctx = SchedulerContext::with_launcher(&settings, stores, registry, launcher).await;
    Harness {
        state: AppState::new(Arc::new(ctx), settings.credentials.clone()),
        sync,
    }
}

pub async fn harness() -> Harness {
    harness_with(settings(true)).await
}

pub fn basic_auth(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        BASE64_STANDARD.encode(format!("{}:{}", username, password))
    )
}

pub fn request(method: &str, uri: &str, body: Option<&str>) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, basic_auth(USERNAME, PASSWORD))
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap()
}

pub fn anonymous(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
