//! API routes.

pub mod health;
pub mod job;
pub mod schedule;
pub mod status;

use axum::Router;
use axum::middleware;

use crate::AppState;
use crate::auth::require_basic_auth;

/// Build the main API router. Only the schedule listing and health checks
/// are reachable without credentials.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .merge(job::router())
        .merge(schedule::protected_router())
        .merge(status::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_basic_auth,
        ));

    Router::new()
        .merge(schedule::public_router())
        .merge(protected)
        .merge(health::router())
        .with_state(state)
}
