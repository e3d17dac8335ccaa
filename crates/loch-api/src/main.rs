//! Loch API Server

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use loch_api::{AppState, jobs, routes};
use loch_config::{Role, load_settings};
use loch_db::{create_pool, run_migrations};
use loch_scheduler::{Dispatcher, SchedulerContext, Stores};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loch-server")]
#[command(about = "Loch job scheduling server", long_about = None)]
struct Args {
    /// Path to the settings file
    #[arg(long, env = "LOCH_CONFIG", default_value = "config/loch.kdl")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut settings = load_settings(&args.config)
        .with_context(|| format!("failed to load settings from {}", args.config))?;
    settings.apply_role(Role::from_env());
    if let Ok(url) = std::env::var("DATABASE_URL") {
        settings.database_url = Some(url);
    }

    let stores = match &settings.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = create_pool(url).await.context("failed to connect to database")?;
            run_migrations(&pool).await.context("failed to run migrations")?;
            info!("Database connected");
            Stores::postgres(pool)
        }
        None => {
            warn!("No database configured; job status and triggers are kept in memory");
            Stores::in_memory()
        }
    };

    let dispatcher = Arc::new(Dispatcher::new(&settings.worker, settings.credentials.clone()));
    let registry = jobs::build_registry(&settings, dispatcher);
    let ctx = Arc::new(SchedulerContext::start(&settings, stores, registry).await);

    let state = AppState::new(ctx.clone(), settings.credentials.clone());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind))?;
    info!(
        addr = %settings.bind,
        instance = %settings.instance_id,
        scheduling = ctx.scheduling_enabled(),
        "Starting server"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Draining jobs before exit");
    ctx.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
