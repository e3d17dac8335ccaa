//! Job trigger command.

use anyhow::{Result, bail};
use serde_json::Value;

use super::{ApiClient, parse_object};

/// Path for a job trigger, with the optional `arg` path segment.
pub fn job_path(command: &str, arg: Option<&str>) -> String {
    match arg {
        Some(arg) => format!("/api/job/{}/{}", command, arg),
        None => format!("/api/job/{}", command),
    }
}

pub async fn start(
    client: &ApiClient,
    command: &str,
    arg: Option<&str>,
    options: Option<&str>,
) -> Result<()> {
    let body = options.map(parse_object).transpose()?.map(Value::Object);
    let response = client.post(&job_path(command, arg), body.as_ref()).await?;

    match response.get("status").and_then(Value::as_str) {
        Some("started") => {
            println!("Started {}", command);
            Ok(())
        }
        Some(status) => bail!("Job {} was not started: {}", command, status),
        None => bail!("Unexpected response: {}", response),
    }
}
