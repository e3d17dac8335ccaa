//! Schedule commands.

use anyhow::{Context, Result, bail};
use loch_core::{CronSpec, JobId};
use serde_json::{Map, Value};

use super::{ApiClient, parse_object, print_json};

fn schedule_path(id: &str) -> String {
    format!("/api/schedule/{}", JobId::new(id).public())
}

/// Turn `hour=4 minute=30` into cron fields, rejecting anything the server
/// would refuse before making a request.
pub fn cron_fields(fields: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for field in fields {
        let Some((name, value)) = field.split_once('=') else {
            bail!("Expected name=value, got '{}'", field);
        };
        map.insert(name.trim().to_string(), Value::String(value.trim().to_string()));
    }
    CronSpec::from_json(&map).context("Invalid cron fields")?;
    Ok(map)
}

fn print_entries(value: &Value) {
    let Some(entries) = value.as_array() else {
        println!("{}", value);
        return;
    };
    if entries.is_empty() {
        println!("No schedules");
        return;
    }
    for entry in entries {
        let id = entry["id"].as_str().unwrap_or_default();
        let trigger = entry["trigger"].as_str().unwrap_or_default();
        let next = entry["nextRun"].as_str().unwrap_or("paused");
        let locked = if entry["locked"].as_bool().unwrap_or(false) {
            " [running]"
        } else {
            ""
        };
        println!("{:<36} {:<40} {}{}", id, trigger, next, locked);
    }
}

pub async fn list(client: &ApiClient) -> Result<()> {
    print_entries(&client.get("/api/schedule").await?);
    Ok(())
}

pub async fn pause(client: &ApiClient, id: &str) -> Result<()> {
    print_json(&client.post(&schedule_path(id), None).await?)
}

pub async fn reschedule(client: &ApiClient, id: &str, fields: &[String]) -> Result<()> {
    let body = Value::Object(cron_fields(fields)?);
    print_json(&client.post(&schedule_path(id), Some(&body)).await?)
}

pub async fn remove(client: &ApiClient, id: &str) -> Result<()> {
    print_entries(&client.delete(&schedule_path(id)).await?);
    Ok(())
}

pub async fn args(client: &ApiClient, id: &str, options: &str) -> Result<()> {
    let body = Value::Object(parse_object(options)?);
    let path = format!("{}/args", schedule_path(id));
    print_json(&client.post(&path, Some(&body)).await?)
}

pub async fn reload(client: &ApiClient) -> Result<()> {
    print_entries(&client.post("/api/schedule/reload", None).await?);
    Ok(())
}
