//! Background job run history.

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use loch_db::JobRunRecord;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/metadata/background_job_status", post(job_status))
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunView {
    pub id: String,
    pub status: String,
    pub instance_id: Option<String>,
    pub details: Option<String>,
    pub started: DateTime<Utc>,
    /// Only set once the run reached a terminal status.
    pub finished: Option<DateTime<Utc>>,
}

impl From<JobRunRecord> for JobRunView {
    fn from(record: JobRunRecord) -> Self {
        let finished = record
            .run_status()
            .is_some_and(|s| s.is_terminal())
            .then_some(record.updated_at);
        Self {
            id: record.job_id,
            status: record.status,
            instance_id: record.instance_id,
            details: record.details,
            started: record.created_at,
            finished,
        }
    }
}

async fn job_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<JobRunView>>, ApiError> {
    let date = query.date.unwrap_or_else(|| Utc::now().date_naive());
    let runs = state.ctx.status().list_by_date(date).await?;
    Ok(Json(runs.into_iter().map(JobRunView::from).collect()))
}
