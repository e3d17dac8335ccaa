//! Job run status command.

use anyhow::Result;
use chrono::NaiveDate;

use super::ApiClient;

pub fn status_path(date: Option<NaiveDate>) -> String {
    match date {
        Some(date) => format!("/api/metadata/background_job_status?date={}", date),
        None => "/api/metadata/background_job_status".to_string(),
    }
}

pub async fn list(client: &ApiClient, date: Option<NaiveDate>) -> Result<()> {
    let runs = client.post(&status_path(date), None).await?;
    let runs = runs.as_array().cloned().unwrap_or_default();
    if runs.is_empty() {
        println!("No job runs");
        return Ok(());
    }

    for run in &runs {
        println!(
            "{:<40} {:<10} {:<20} {} -> {}",
            run["id"].as_str().unwrap_or_default(),
            run["status"].as_str().unwrap_or_default(),
            run["instanceId"].as_str().unwrap_or("-"),
            run["started"].as_str().unwrap_or_default(),
            run["finished"].as_str().unwrap_or("..."),
        );
        if let Some(details) = run["details"].as_str() {
            println!("    {}", details);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_path() {
        assert_eq!(status_path(None), "/api/metadata/background_job_status");
        let date = NaiveDate::from_ymd_opt(2024, 9, 3).unwrap();
        assert_eq!(
            status_path(Some(date)),
            "/api/metadata/background_job_status?date=2024-09-03"
        );
    }
}
