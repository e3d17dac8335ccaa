//! Schedule inspection and mutation endpoints.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use loch_core::{CronSpec, JobId};
use loch_scheduler::{ScheduleEntry, Scheduler, SchedulerError};

use crate::AppState;
use crate::error::ApiError;
use crate::routes::job::parse_options;

pub fn public_router() -> Router<AppState> {
    Router::new().route("/api/schedule", get(list_schedule))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/api/schedule/reload", post(reload_schedule))
        .route(
            "/api/schedule/{job_id}",
            post(update_schedule).delete(remove_schedule),
        )
        .route("/api/schedule/{job_id}/args", post(update_schedule_args))
}

fn scheduler(state: &AppState) -> Result<&Arc<Scheduler>, ApiError> {
    state
        .ctx
        .scheduler()
        .ok_or_else(|| SchedulerError::Disabled.into())
}

/// Every trigger, or nothing when this instance does not schedule.
async fn list_schedule(State(state): State<AppState>) -> Result<Json<Vec<ScheduleEntry>>, ApiError> {
    match state.ctx.scheduler() {
        Some(scheduler) => Ok(Json(scheduler.entries().await?)),
        None => Ok(Json(Vec::new())),
    }
}

/// Empty body or `{}` pauses; cron fields reschedule.
async fn update_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Result<Json<ScheduleEntry>, ApiError> {
    let scheduler = scheduler(&state)?;
    let id = JobId::new(&job_id);
    if scheduler.get(&id).await?.is_none() {
        return Err(ApiError::BadRequest(format!("no job with id {}", job_id)));
    }

    let fields = parse_options(&body)?;
    let job = if fields.is_empty() {
        scheduler.pause(&id).await?
    } else {
        let trigger = CronSpec::from_json(&fields)?;
        scheduler.reschedule(&id, trigger).await?
    };
    Ok(Json(scheduler.entry(job).await))
}

async fn remove_schedule(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Vec<ScheduleEntry>>, ApiError> {
    let scheduler = scheduler(&state)?;
    scheduler.remove(&JobId::new(&job_id)).await?;
    Ok(Json(scheduler.entries().await?))
}

async fn update_schedule_args(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    body: Bytes,
) -> Result<Json<ScheduleEntry>, ApiError> {
    let scheduler = scheduler(&state)?;
    let delta = parse_options(&body)?;
    let job = scheduler.update_args(&JobId::new(&job_id), delta).await?;
    Ok(Json(scheduler.entry(job).await))
}

async fn reload_schedule(
    State(state): State<AppState>,
) -> Result<Json<Vec<ScheduleEntry>>, ApiError> {
    state.ctx.reload().await?;
    Ok(Json(scheduler(&state)?.entries().await?))
}

#[cfg(test)]
mod tests {
    use crate::routes::router;
    use crate::test_support::{anonymous, harness, harness_with, json_body, request, settings};
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_listing_after_initialize() {
        let h = harness().await;
        let response = router(h.state)
            .oneshot(anonymous("GET", "/api/schedule"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["id"], "job_sync_canvas_snapshots");
        assert_eq!(entries[0]["trigger"], "cron[hour='1', minute='0']");
        assert_eq!(entries[0]["locked"], false);
        assert_eq!(entries[0]["components"], json!(["SyncCanvasSnapshots"]));
        assert!(entries[0]["nextRun"].is_string());
    }

    #[tokio::test]
    async fn test_empty_body_pauses() {
        let h = harness().await;
        let app = router(h.state);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/schedule/job_sync_canvas_snapshots", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["nextRun"].is_null());

        let listing = json_body(app.oneshot(anonymous("GET", "/api/schedule")).await.unwrap()).await;
        assert!(listing[0]["nextRun"].is_null());
        assert_eq!(listing[0]["trigger"], "cron[hour='1', minute='0']");
    }

    #[tokio::test]
    async fn test_reschedule_and_errors() {
        let h = harness().await;
        let app = router(h.state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/schedule/JOB_SYNC_CANVAS_SNAPSHOTS",
                Some(r#"{"hour": 4, "minute": 30}"#),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["trigger"], "cron[hour='4', minute='30']");

        let bad_cron = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/schedule/job_sync_canvas_snapshots",
                Some(r#"{"hour": 99}"#),
            ))
            .await
            .unwrap();
        assert_eq!(bad_cron.status(), StatusCode::BAD_REQUEST);

        let unknown_field = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/schedule/job_sync_canvas_snapshots",
                Some(r#"{"fortnight": 1}"#),
            ))
            .await
            .unwrap();
        assert_eq!(unknown_field.status(), StatusCode::BAD_REQUEST);

        let unknown_id = app
            .oneshot(request("POST", "/api/schedule/job_nope", Some(r#"{"hour": 1}"#)))
            .await
            .unwrap();
        assert_eq!(unknown_id.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_args_and_reload() {
        let h = harness().await;
        let app = router(h.state);

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/schedule/job_sync_canvas_snapshots/args",
                Some(r#"{"term_id": "2178", "lock_id": 7}"#),
            ))
            .await
            .unwrap();
        let entry = json_body(response).await;
        assert_eq!(entry["args"], json!({"term_id": "2178"}));

        app.clone()
            .oneshot(request(
                "POST",
                "/api/schedule/job_sync_canvas_snapshots",
                Some(r#"{"hour": 6}"#),
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(request("POST", "/api/schedule/reload", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let listing = json_body(response).await;
        assert_eq!(listing[0]["trigger"], "cron[hour='1', minute='0']");
        assert!(listing[0].get("args").is_none());
    }

    #[tokio::test]
    async fn test_remove_returns_remaining() {
        let h = harness().await;
        let app = router(h.state);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/schedule/job_sync_canvas_snapshots", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!([]));

        let again = app
            .oneshot(request("DELETE", "/api/schedule/job_sync_canvas_snapshots", None))
            .await
            .unwrap();
        assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disabled_scheduling() {
        let h = harness_with(settings(false)).await;
        let app = router(h.state);

        let listing = json_body(app.clone().oneshot(anonymous("GET", "/api/schedule")).await.unwrap()).await;
        assert_eq!(listing, json!([]));

        let reload = app
            .oneshot(request("POST", "/api/schedule/reload", None))
            .await
            .unwrap();
        assert_eq!(reload.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mutations_require_auth() {
        let h = harness().await;
        let response = router(h.state)
            .oneshot(anonymous("DELETE", "/api/schedule/job_sync_canvas_snapshots"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
