//! HTTP API server for the loch job platform.
//!
//! Exposes job triggering, schedule management and job run status over
//! HTTP. Everything except the schedule listing and health checks requires
//! the shared Basic-Auth credentials.

pub mod auth;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use state::AppState;
