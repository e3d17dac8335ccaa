//! Job trigger endpoints.
//!
//! The response only says whether the job was accepted. Its outcome is
//! recorded in the job status table.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use loch_core::JobArgs;
use loch_scheduler::SchedulerError;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/job/{command}", post(start_job))
        .route("/api/job/{command}/{arg}", post(start_job_with_arg))
}

/// Parse an optional JSON object body into job options.
pub(crate) fn parse_options(body: &Bytes) -> Result<JobArgs, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(JobArgs::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(JobArgs::new()),
        Ok(_) => Err(ApiError::BadRequest("expected a JSON object".to_string())),
        Err(e) => Err(ApiError::BadRequest(format!("invalid JSON body: {}", e))),
    }
}

async fn start_job(
    State(state): State<AppState>,
    Path(command): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let args = parse_options(&body)?;
    start(&state, &command, args).await
}

async fn start_job_with_arg(
    State(state): State<AppState>,
    Path((command, arg)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let mut args = parse_options(&body)?;
    args.insert("arg".to_string(), Value::String(arg));
    start(&state, &command, args).await
}

async fn start(state: &AppState, command: &str, args: JobArgs) -> Result<Json<Value>, ApiError> {
    let status = match state.ctx.trigger(command, args).await {
        Ok(true) => "started",
        Ok(false) => "errored",
        Err(SchedulerError::NotFound(_)) => {
            return Err(ApiError::NotFound(format!("unknown job: {}", command)));
        }
        Err(e) => {
            error!(command, error = %e, "Failed to start job");
            "errored"
        }
    };
    info!(command, status, "Job trigger handled");
    Ok(Json(json!({ "status": status })))
}

#[cfg(test)]
mod tests {
    use crate::routes::router;
    use crate::test_support::{anonymous, basic_auth, harness, json_body, request};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use chrono::Utc;
    use loch_core::RunStatus;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unauthenticated_trigger_is_rejected() {
        let h = harness().await;
        let app = router(h.state.clone());

        let response = app
            .clone()
            .oneshot(anonymous("POST", "/api/job/sync_canvas_snapshots"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .method("POST")
            .uri("/api/job/sync_canvas_snapshots/2178")
            .header(header::AUTHORIZATION, basic_auth("loch", "wrong"))
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(wrong).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(h.sync.calls(), 0);
        let runs = h
            .state
            .ctx
            .status()
            .list_by_date(Utc::now().date_naive())
            .await
            .unwrap();
        assert!(runs.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_starts_job() {
        let h = harness().await;
        let response = router(h.state.clone())
            .oneshot(request("POST", "/api/job/sync_canvas_snapshots", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "started");
        assert_eq!(h.sync.calls(), 1);

        let record = h
            .state
            .ctx
            .status()
            .most_recent("SyncCanvasSnapshots", None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.run_status(), Some(RunStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_trigger_with_arg_and_body() {
        let h = harness().await;
        let response = router(h.state.clone())
            .oneshot(request(
                "POST",
                "/api/job/sync_canvas_snapshots/2178",
                Some(r#"{"force": true}"#),
            ))
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "started");

        let record = h
            .state
            .ctx
            .status()
            .most_recent("SyncCanvasSnapshots", None)
            .await
            .unwrap()
            .unwrap();
        let details: serde_json::Value =
            serde_json::from_str(record.details.as_deref().unwrap()).unwrap();
        assert_eq!(details["arg"], "2178");
        assert_eq!(details["force"], true);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let h = harness().await;
        let response = router(h.state)
            .oneshot(request("POST", "/api/job/not_a_job", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_object_body_is_400() {
        let h = harness().await;
        let response = router(h.state)
            .oneshot(request("POST", "/api/job/sync_canvas_snapshots", Some("[1, 2]")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
