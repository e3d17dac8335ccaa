//! The cron scheduler.
//!
//! Triggers live in the schedule store. On start the scheduler reconciles
//! the store with the configured schedules, then a background task polls for
//! due triggers and hands each fired job to the launcher, so a long job never
//! holds up other triggers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use loch_config::{ScheduleSetting, SchedulingSettings};
use loch_core::{CronSpec, JobArgs, JobId, JobTarget, ScheduledJob, lock_id_for};
use loch_db::{JobStatusRepo, ScheduleRepo};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::launcher::Launcher;
use crate::registry::JobRegistry;
use crate::runner::Invocation;
use crate::{SchedulerError, SchedulerResult};

/// Option key reserved for the advisory lock id.
pub const LOCK_ID_ARG: &str = "lock_id";

/// What `initialize` did to the store.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InitReport {
    pub installed: Vec<JobId>,
    pub kept: Vec<JobId>,
    pub removed: Vec<JobId>,
    /// Configured triggers that could not be installed.
    pub failed: Vec<JobId>,
    /// Run ids left in `started` past the stalled window.
    pub stalled: Vec<String>,
}

/// A trigger as reported to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub components: Vec<String>,
    pub trigger: String,
    pub next_run: Option<DateTime<Utc>>,
    pub locked: bool,
    #[serde(skip_serializing_if = "JobArgs::is_empty")]
    pub args: JobArgs,
}

pub struct Scheduler {
    repo: Arc<dyn ScheduleRepo>,
    status: Arc<dyn JobStatusRepo>,
    registry: Arc<JobRegistry>,
    launcher: Arc<Launcher>,
    configured: BTreeMap<JobId, ScheduleSetting>,
    stalled_after: TimeDelta,
    tick_interval: Duration,
    shutdown: Notify,
}

impl Scheduler {
    pub fn new(
        repo: Arc<dyn ScheduleRepo>,
        status: Arc<dyn JobStatusRepo>,
        registry: Arc<JobRegistry>,
        launcher: Arc<Launcher>,
        settings: &SchedulingSettings,
        configured: BTreeMap<JobId, ScheduleSetting>,
    ) -> Self {
        Self {
            repo,
            status,
            registry,
            launcher,
            configured,
            stalled_after: TimeDelta::try_hours(settings.stalled_after_hours.max(1))
                .unwrap_or(TimeDelta::MAX),
            tick_interval: Duration::from_secs(settings.tick_seconds.max(1)),
            shutdown: Notify::new(),
        }
    }

    /// Reconcile the store with the configured schedules.
    ///
    /// Triggers whose job classes are gone are removed. With `force`, every
    /// configured trigger is rewritten and triggers no longer configured are
    /// removed; without it, existing triggers are kept as they are.
    pub async fn initialize(&self, force: bool) -> SchedulerResult<InitReport> {
        let mut report = InitReport::default();

        for job in self.repo.list().await? {
            let unbuildable = !self.registry.can_build(&job.target);
            let unconfigured = force && !self.configured.contains_key(&job.id);
            if unbuildable || unconfigured {
                warn!(job_id = %job.id, unbuildable, "Removing stale trigger");
                self.repo.delete(&job.id).await?;
                report.removed.push(job.id);
            }
        }

        for (id, setting) in &self.configured {
            let Some(definition) = self.registry.definition(id) else {
                warn!(job_id = %id, "No job definition for configured schedule; skipping");
                continue;
            };
            if !self.registry.can_build(&definition.target) {
                warn!(job_id = %id, components = ?definition.target.components(), "Job classes not registered; skipping");
                continue;
            }

            if let Some(run_id) = self.check_stalled(id, &definition.target).await? {
                report.stalled.push(run_id);
            }

            let mut options = definition.options.clone();
            options.extend(setting.options.clone());

            let existed = self.repo.get(id).await?.is_some();
            let added = self
                .add(
                    id.clone(),
                    definition.target.clone(),
                    options,
                    setting.trigger.clone(),
                    force,
                )
                .await;
            match added {
                Ok(_) => {}
                Err(SchedulerError::Store(e)) => return Err(SchedulerError::Store(e)),
                Err(e) => {
                    error!(job_id = %id, error = %e, "Could not install trigger; skipping");
                    report.failed.push(id.clone());
                    continue;
                }
            }
            if existed && !force {
                report.kept.push(id.clone());
            } else {
                report.installed.push(id.clone());
            }
        }

        info!(
            installed = report.installed.len(),
            kept = report.kept.len(),
            removed = report.removed.len(),
            failed = report.failed.len(),
            "Scheduler initialized"
        );
        Ok(report)
    }

    /// Name the status store uses for runs of this target.
    fn run_name<'a>(id: &'a JobId, target: &'a JobTarget) -> &'a str {
        match target {
            JobTarget::Single(class) => class.as_str(),
            JobTarget::Chain(_) => id.as_str(),
        }
    }

    /// Log the most recent run of the job if it is still `started` past the
    /// stalled window. Never blocks scheduling.
    async fn check_stalled(&self, id: &JobId, target: &JobTarget) -> SchedulerResult<Option<String>> {
        let name = Self::run_name(id, target);
        let Some(last) = self.status.most_recent(name, None).await? else {
            return Ok(None);
        };
        let cutoff = Utc::now().checked_sub_signed(self.stalled_after);
        let stalled = last.run_status().is_some_and(|s| !s.is_terminal())
            && cutoff.is_some_and(|cutoff| last.created_at < cutoff);
        if !stalled {
            return Ok(None);
        }
        warn!(
            job_id = %id,
            run_id = %last.job_id,
            started = %last.created_at,
            "Last run never finished; job may be stalled"
        );
        Ok(Some(last.job_id))
    }

    /// Install a trigger. An existing trigger is kept unless `force` is set.
    /// An empty cron spec installs the job paused.
    pub async fn add(
        &self,
        id: JobId,
        target: JobTarget,
        mut options: JobArgs,
        trigger: CronSpec,
        force: bool,
    ) -> SchedulerResult<ScheduledJob> {
        let lock_id = lock_id_for(&id).ok_or_else(|| SchedulerError::NoLockId(id.to_string()))?;

        if !force {
            if let Some(existing) = self.repo.get(&id).await? {
                debug!(job_id = %id, "Keeping existing trigger");
                return Ok(existing);
            }
        }

        let next_run_time = Self::first_run(&trigger)?;
        options.remove(LOCK_ID_ARG);
        let job = ScheduledJob {
            id,
            target,
            trigger,
            options,
            lock_id: Some(lock_id),
            next_run_time,
        };
        self.repo.upsert(&job).await?;
        info!(job_id = %job.id, trigger = %job.trigger.describe(), next_run = ?job.next_run_time, "Trigger installed");
        Ok(job)
    }

    fn first_run(trigger: &CronSpec) -> SchedulerResult<Option<DateTime<Utc>>> {
        if trigger.is_empty() {
            return Ok(None);
        }
        match trigger.next_after(Utc::now())? {
            Some(next) => Ok(Some(next)),
            None => Err(SchedulerError::InvalidTrigger(format!(
                "{} never fires",
                trigger.describe()
            ))),
        }
    }

    pub async fn get(&self, id: &JobId) -> SchedulerResult<Option<ScheduledJob>> {
        Ok(self.repo.get(id).await?)
    }

    pub async fn list(&self) -> SchedulerResult<Vec<ScheduledJob>> {
        Ok(self.repo.list().await?)
    }

    async fn require(&self, id: &JobId) -> SchedulerResult<ScheduledJob> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(id.public()))
    }

    pub async fn remove(&self, id: &JobId) -> SchedulerResult<()> {
        if !self.repo.delete(id).await? {
            return Err(SchedulerError::NotFound(id.public()));
        }
        info!(job_id = %id, "Trigger removed");
        Ok(())
    }

    /// Replace a trigger's cron fields. An empty spec pauses the job.
    pub async fn reschedule(&self, id: &JobId, trigger: CronSpec) -> SchedulerResult<ScheduledJob> {
        if trigger.is_empty() {
            return self.pause(id).await;
        }
        trigger.validate()?;
        let mut job = self.require(id).await?;
        job.next_run_time = Self::first_run(&trigger)?;
        job.trigger = trigger;
        self.repo.upsert(&job).await?;
        info!(job_id = %id, trigger = %job.trigger.describe(), next_run = ?job.next_run_time, "Trigger rescheduled");
        Ok(job)
    }

    /// Clear the next run time. The trigger itself is kept for display.
    pub async fn pause(&self, id: &JobId) -> SchedulerResult<ScheduledJob> {
        let mut job = self.require(id).await?;
        job.next_run_time = None;
        self.repo.upsert(&job).await?;
        info!(job_id = %id, "Trigger paused");
        Ok(job)
    }

    /// Merge options into a trigger's bound options. The lock id key is
    /// reserved and ignored.
    pub async fn update_args(&self, id: &JobId, mut delta: JobArgs) -> SchedulerResult<ScheduledJob> {
        delta.remove(LOCK_ID_ARG);
        if delta.is_empty() {
            return Err(SchedulerError::InvalidInput(
                "expected a non-empty object of job arguments".to_string(),
            ));
        }
        let mut job = self.require(id).await?;
        job.options.extend(delta);
        self.repo.upsert(&job).await?;
        info!(job_id = %id, "Trigger arguments updated");
        Ok(job)
    }

    pub async fn is_locked(&self, job: &ScheduledJob) -> bool {
        match job.lock_id {
            Some(lock_id) => self.launcher.runner().is_locked(lock_id).await,
            None => false,
        }
    }

    pub async fn entry(&self, job: ScheduledJob) -> ScheduleEntry {
        let locked = self.is_locked(&job).await;
        ScheduleEntry {
            id: job.id.public(),
            components: job.target.components().into_iter().map(String::from).collect(),
            trigger: job.trigger.describe(),
            next_run: job.next_run_time,
            locked,
            args: job.options,
        }
    }

    pub async fn entries(&self) -> SchedulerResult<Vec<ScheduleEntry>> {
        let mut entries = Vec::new();
        for job in self.list().await? {
            entries.push(self.entry(job).await);
        }
        Ok(entries)
    }

    /// Fire every trigger due at `now`. Each trigger's next run time is
    /// advanced before its job is launched, so missed firings collapse into
    /// one run. A trigger paused or rescheduled since it was read is left
    /// alone. Returns the number of jobs accepted.
    pub async fn tick(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let mut fired = 0;
        for scheduled in self.repo.due(now).await? {
            let Some(job) = self.registry.build(&scheduled.id, &scheduled.target) else {
                warn!(job_id = %scheduled.id, "Trigger references unknown job classes; removing");
                self.repo.delete(&scheduled.id).await?;
                continue;
            };

            let next_run_time = match scheduled.trigger.next_after(now) {
                Ok(next) => next,
                Err(e) => {
                    error!(job_id = %scheduled.id, error = %e, "Invalid stored trigger; pausing");
                    None
                }
            };
            let advanced = self
                .repo
                .advance(&scheduled.id, scheduled.next_run_time, next_run_time)
                .await?;
            if !advanced {
                debug!(job_id = %scheduled.id, "Trigger changed since it was read; not firing");
                continue;
            }

            info!(job_id = %scheduled.id, next_run = ?next_run_time, "Trigger fired");
            let invocation = Invocation {
                lock_id: scheduled.lock_id,
                args: scheduled.options.clone(),
            };
            if self.launcher.run_async(job, invocation).await {
                fired += 1;
            }
        }
        Ok(fired)
    }

    /// Poll for due triggers until `stop` is called.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            info!(interval = ?scheduler.tick_interval, "Scheduler started");
            loop {
                tokio::select! {
                    _ = scheduler.shutdown.notified() => break,
                    _ = tokio::time::sleep(scheduler.tick_interval) => {
                        if let Err(e) = scheduler.tick(Utc::now()).await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                }
            }
            info!("Scheduler stopped");
        })
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}
