//! Master to worker dispatch over authenticated HTTP.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loch_config::{Credentials, WorkerSettings};
use loch_core::{Job, JobContext, JobError, JobOutcome};
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

/// Triggers named jobs on the worker host.
///
/// `dispatch` never fails outward: transport errors, non-2xx responses and
/// unparseable bodies are logged and reported as `None`. A successful call
/// only means the worker accepted the job; its outcome is in the status store.
pub struct Dispatcher {
    host: String,
    credentials: Credentials,
    client: reqwest::Client,
}

impl Dispatcher {
    pub fn new(worker: &WorkerSettings, credentials: Credentials) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(worker.timeout_seconds))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client with timeout; using defaults");
                reqwest::Client::new()
            });
        Self {
            host: worker.host.clone(),
            credentials,
            client,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// `http` for a localhost worker, `https` otherwise.
    pub fn build_url(&self, command: &str) -> Result<Url, url::ParseError> {
        let hostname = self.host.split(':').next().unwrap_or_default();
        let scheme = if hostname == "localhost" { "http" } else { "https" };
        let mut url = Url::parse(&format!("{}://{}/api/job/", scheme, self.host))?;
        url = url.join(command.trim_start_matches('/'))?;
        Ok(url)
    }

    pub async fn dispatch(&self, command: &str, data: Option<&Value>) -> Option<Value> {
        let url = match self.build_url(command) {
            Ok(url) => url,
            Err(e) => {
                error!(command, host = %self.host, error = %e, "Invalid dispatch URL");
                return None;
            }
        };

        let mut request = self
            .client
            .post(url.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password));
        if let Some(data) = data {
            request = request.json(data);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = %e, "Dispatch request failed");
                return None;
            }
        };
        let response = match response.error_for_status() {
            Ok(response) => response,
            Err(e) => {
                error!(url = %url, error = %e, "Worker rejected dispatch");
                return None;
            }
        };
        match response.json::<Value>().await {
            Ok(body) => {
                info!(url = %url, response = %body, "Dispatched job");
                Some(body)
            }
            Err(e) => {
                error!(url = %url, error = %e, "Unreadable dispatch response");
                None
            }
        }
    }
}

/// A job whose body runs on the worker host.
pub struct DispatchJob {
    class: String,
    command: String,
    dispatcher: Arc<Dispatcher>,
}

impl DispatchJob {
    pub fn new(
        class: impl Into<String>,
        command: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            class: class.into(),
            command: command.into(),
            dispatcher,
        }
    }
}

#[async_trait]
impl Job for DispatchJob {
    fn name(&self) -> &str {
        &self.class
    }

    fn runs_remotely(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        let data = (!ctx.args.is_empty()).then(|| Value::Object(ctx.args.clone()));
        match self.dispatcher.dispatch(&self.command, data.as_ref()).await {
            Some(body) => Ok(format!("Dispatched {}: {}", self.command, body)),
            None => Err(JobError::failed(format!(
                "Dispatch of {} to {} failed",
                self.command,
                self.dispatcher.host()
            ))),
        }
    }
}
