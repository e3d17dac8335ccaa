//! CLI command implementations.

pub mod job;
pub mod schedule;
pub mod status;

use anyhow::{Context, Result, bail};
use loch_config::load_settings;
use loch_core::lock_id_for;
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

/// Thin Basic-Auth client for the loch API.
pub struct ApiClient {
    base: Url,
    http: reqwest::Client,
    username: String,
    password: Option<String>,
}

impl ApiClient {
    pub fn new(api_url: &str, username: &str, password: Option<String>) -> Result<Self> {
        let base = Url::parse(api_url).with_context(|| format!("Invalid API URL: {}", api_url))?;
        Ok(Self {
            base,
            http: reqwest::Client::new(),
            username: username.to_string(),
            password,
        })
    }

    pub async fn get(&self, path: &str) -> Result<Value> {
        self.send(Method::GET, path, None).await
    }

    pub async fn post(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        self.send(Method::POST, path, body).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value> {
        self.send(Method::DELETE, path, None).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = self.base.join(path)?;
        debug!(%method, %url, "Calling API");

        let mut request = self.http.request(method, url.clone());
        if let Some(password) = &self.password {
            request = request.basic_auth(&self.username, Some(password));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        let status = response.status();
        let text = response.text().await?;
        let value: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .with_context(|| format!("Unexpected response from {}: {}", url, text))?
        };

        if status == StatusCode::UNAUTHORIZED {
            bail!("Not authorized; set LOCH_PASSWORD or pass --password");
        }
        if !status.is_success() {
            let message = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or(text);
            bail!("{} ({})", message, status);
        }
        Ok(value)
    }
}

/// Parse a JSON object given on the command line.
pub fn parse_object(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str(raw).context("Options must be valid JSON")? {
        Value::Object(map) => Ok(map),
        _ => bail!("Options must be a JSON object"),
    }
}

pub fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a settings file and report anything the server would skip.
pub fn validate(path: &str) -> Result<()> {
    let settings = load_settings(path).with_context(|| format!("Failed to load {}", path))?;
    let warnings = warnings(&settings);

    println!("Configuration is valid");
    println!("Scheduling enabled: {}", settings.scheduling.enabled);
    println!("Schedules: {}", settings.schedules.len());
    println!("Job bodies: {}", settings.job_bodies.len());
    for warning in &warnings {
        println!("warning: {}", warning);
    }
    Ok(())
}

fn warnings(settings: &loch_config::Settings) -> Vec<String> {
    let mut warnings = Vec::new();
    for id in settings.schedules.keys() {
        if lock_id_for(id).is_none() {
            warnings.push(format!("{} has no advisory lock id and will not be scheduled", id));
        }
    }
    if settings.credentials.password.is_empty() {
        warnings.push("no credentials configured; every protected request will be rejected".to_string());
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use loch_config::parse_settings;
    use serde_json::json;

    #[test]
    fn test_sample_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/loch.kdl");
        let settings = load_settings(path).unwrap();
        assert!(warnings(&settings).is_empty());
        assert_eq!(settings.schedules.len(), 9);
    }

    #[test]
    fn test_warnings_for_unknown_ids() {
        let settings = parse_settings(
            r#"
            schedule {
                JOB_SYNC_CANVAS_SNAPSHOTS hour=1
                JOB_MADE_UP hour=2
            }
            "#,
        )
        .unwrap();
        let warnings = warnings(&settings);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("JOB_MADE_UP"));
    }

    #[test]
    fn test_parse_object() {
        assert_eq!(parse_object(r#"{"a": 1}"#).unwrap()["a"], 1);
        assert!(parse_object("[1]").is_err());
        assert!(parse_object("nope").is_err());
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_client_sends_credentials_and_body() {
        let app = Router::new().route(
            "/api/job/{command}",
            post(|headers: HeaderMap, body: String| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                axum::Json(json!({"auth": auth, "body": body}))
            }),
        );
        let url = serve(app).await;

        let client = ApiClient::new(&url, "loch", Some("secret".to_string())).unwrap();
        let response = client
            .post("/api/job/sync_canvas_snapshots", Some(&json!({"force": true})))
            .await
            .unwrap();
        assert_eq!(response["auth"], "Basic bG9jaDpzZWNyZXQ=");
        assert_eq!(response["body"], r#"{"force":true}"#);
    }

    #[tokio::test]
    async fn test_client_surfaces_api_errors() {
        let app = Router::new().route(
            "/api/schedule/{id}",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    axum::Json(json!({"error": "job not found: JOB_NOPE"})),
                )
            }),
        );
        let url = serve(app).await;

        let client = ApiClient::new(&url, "loch", Some("secret".to_string())).unwrap();
        let err = client.post("/api/schedule/job_nope", None).await.unwrap_err();
        assert!(err.to_string().contains("job not found"));
        assert!(err.to_string().contains("400"));
    }
}
