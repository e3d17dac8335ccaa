//! Process-wide scheduling state, constructed once at start and passed
//! explicitly to whatever needs it.

use std::sync::{Arc, Mutex};

use loch_config::Settings;
use loch_core::JobArgs;
use loch_db::memory::{MemoryAdvisoryLocks, MemoryJobStatusRepo, MemoryScheduleRepo};
use loch_db::{
    AdvisoryLocks, JobStatusRepo, PgAdvisoryLocks, PgJobStatusRepo, PgScheduleRepo, ScheduleRepo,
};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::launcher::Launcher;
use crate::registry::JobRegistry;
use crate::runner::{Invocation, JobRunner};
use crate::scheduler::{InitReport, Scheduler};
use crate::{SchedulerError, SchedulerResult};

/// The stores the scheduling runtime works against.
#[derive(Clone)]
pub struct Stores {
    pub schedules: Arc<dyn ScheduleRepo>,
    pub status: Arc<dyn JobStatusRepo>,
    pub locks: Arc<dyn AdvisoryLocks>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            schedules: Arc::new(PgScheduleRepo::new(pool.clone())),
            status: Arc::new(PgJobStatusRepo::new(pool.clone())),
            locks: Arc::new(PgAdvisoryLocks::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            schedules: Arc::new(MemoryScheduleRepo::new()),
            status: Arc::new(MemoryJobStatusRepo::new()),
            locks: Arc::new(MemoryAdvisoryLocks::new()),
        }
    }

    pub fn runner(&self, instance_id: &str) -> Arc<JobRunner> {
        Arc::new(JobRunner::new(
            self.status.clone(),
            self.locks.clone(),
            instance_id,
        ))
    }
}

pub struct SchedulerContext {
    stores: Stores,
    registry: Arc<JobRegistry>,
    launcher: Arc<Launcher>,
    scheduler: Option<Arc<Scheduler>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerContext {
    /// Build the runtime for the configured role and start scheduling.
    pub async fn start(settings: &Settings, stores: Stores, registry: JobRegistry) -> Self {
        let runner = stores.runner(&settings.instance_id);
        let launcher = Launcher::for_settings(runner, settings.queue.enabled, settings.queue.threads);
        Self::with_launcher(settings, stores, registry, launcher).await
    }

    /// Like `start`, with a caller-provided launcher.
    ///
    /// If the trigger store cannot be initialized, scheduling stays disabled
    /// for the lifetime of the process.
    pub async fn with_launcher(
        settings: &Settings,
        stores: Stores,
        registry: JobRegistry,
        launcher: Launcher,
    ) -> Self {
        let registry = Arc::new(registry);
        let launcher = Arc::new(launcher);

        let mut scheduler = None;
        let mut ticker = None;
        if settings.scheduling.enabled {
            let candidate = Arc::new(Scheduler::new(
                stores.schedules.clone(),
                stores.status.clone(),
                registry.clone(),
                launcher.clone(),
                &settings.scheduling,
                settings.schedules.clone(),
            ));
            match candidate.initialize(false).await {
                Ok(report) => {
                    if !report.stalled.is_empty() {
                        warn!(stalled = ?report.stalled, "Stalled job runs found");
                    }
                    ticker = Some(candidate.start());
                    scheduler = Some(candidate);
                }
                Err(e) => {
                    error!(error = %e, "Scheduler initialization failed; scheduling disabled");
                }
            }
        } else {
            info!("Scheduling is disabled on this instance");
        }

        Self {
            stores,
            registry,
            launcher,
            scheduler,
            ticker: Mutex::new(ticker),
        }
    }

    pub fn scheduler(&self) -> Option<&Arc<Scheduler>> {
        self.scheduler.as_ref()
    }

    pub fn scheduling_enabled(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn launcher(&self) -> &Arc<Launcher> {
        &self.launcher
    }

    pub fn status(&self) -> &Arc<dyn JobStatusRepo> {
        &self.stores.status
    }

    /// Reinstall every trigger from configuration.
    pub async fn reload(&self) -> SchedulerResult<InitReport> {
        let scheduler = self.scheduler.as_ref().ok_or(SchedulerError::Disabled)?;
        scheduler.initialize(true).await
    }

    /// Start a job by command name. Returns whether it was accepted.
    pub async fn trigger(&self, command: &str, args: JobArgs) -> SchedulerResult<bool> {
        let (job, lock_id) = self
            .registry
            .resolve_command(command)
            .ok_or_else(|| SchedulerError::NotFound(command.to_string()))?;
        let invocation = Invocation { lock_id, args };
        Ok(self.launcher.run_async(job, invocation).await)
    }

    /// Stop the trigger loop and drain the execution queue.
    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.stop();
        }
        let ticker = self
            .ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(ticker) = ticker {
            if let Err(e) = ticker.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }
        self.launcher.shutdown().await;
    }
}
