//! HTTP Basic authentication for job and schedule endpoints.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::prelude::*;
use tracing::{debug, warn};

use crate::AppState;
use crate::error::ApiError;

/// Parse `Basic <base64(username:password)>` into its two parts.
pub fn parse_basic_auth(header_value: &str) -> Result<(String, String), ApiError> {
    let encoded = header_value
        .strip_prefix("Basic ")
        .ok_or_else(|| ApiError::Unauthorized("expected Basic authorization".to_string()))?;
    let decoded = BASE64_STANDARD
        .decode(encoded.trim().as_bytes())
        .map_err(|e| ApiError::Unauthorized(format!("invalid base64 credentials: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|_| ApiError::Unauthorized("credentials are not UTF-8".to_string()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| ApiError::Unauthorized("credentials must be username:password".to_string()))?;
    Ok((username.to_string(), password.to_string()))
}

/// Reject requests without the shared credentials before they reach a handler.
pub async fn require_basic_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(value) = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        debug!(path = %request.uri().path(), "No credentials provided");
        return Err(ApiError::Unauthorized("authentication required".to_string()));
    };

    let (username, password) = parse_basic_auth(value)?;
    if !state.credentials.matches(&username, &password) {
        warn!(path = %request.uri().path(), username = %username, "Invalid credentials");
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }
    Ok(next.run(request).await)
}
