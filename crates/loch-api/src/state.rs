//! Application state.

use std::sync::Arc;

use loch_config::Credentials;
use loch_scheduler::SchedulerContext;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<SchedulerContext>,
    pub credentials: Arc<Credentials>,
}

impl AppState {
    pub fn new(ctx: Arc<SchedulerContext>, credentials: Credentials) -> Self {
        Self {
            ctx,
            credentials: Arc::new(credentials),
        }
    }
}
