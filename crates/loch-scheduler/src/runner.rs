//! The execution wrapper every job invocation goes through.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use loch_core::{Job, JobArgs, JobContext, JobError, JobOutcome, RunStatus};
use loch_db::{AdvisoryLocks, JobStatusRepo, LockLease};
use tracing::{error, info, warn};

/// Options and lock for one invocation.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub lock_id: Option<i64>,
    pub args: JobArgs,
}

impl Invocation {
    pub fn new(args: JobArgs) -> Self {
        Self {
            lock_id: None,
            args,
        }
    }

    pub fn locked(lock_id: i64, args: JobArgs) -> Self {
        Self {
            lock_id: Some(lock_id),
            args,
        }
    }
}

/// Runs jobs under their advisory lock and records each run.
pub struct JobRunner {
    status: Arc<dyn JobStatusRepo>,
    locks: Arc<dyn AdvisoryLocks>,
    instance_id: String,
}

impl JobRunner {
    pub fn new(
        status: Arc<dyn JobStatusRepo>,
        locks: Arc<dyn AdvisoryLocks>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            status,
            locks,
            instance_id: instance_id.into(),
        }
    }

    /// Run a job and return its real outcome.
    ///
    /// Jobs that run remotely are not locked here. A held lock refuses the
    /// run without creating a status row. Otherwise the run is recorded as
    /// `started`, then moved to a terminal status. A panicking body is
    /// recorded as `errored`.
    pub async fn run_wrapped(&self, job: &dyn Job, mut invocation: Invocation) -> JobOutcome {
        if job.runs_remotely() {
            invocation.lock_id = None;
        }
        let lease = match invocation.lock_id {
            Some(lock_id) => match self.locks.try_lock(lock_id).await {
                Ok(Some(lease)) => Some(lease),
                Ok(None) => {
                    warn!(job = job.name(), lock_id, "Advisory lock held; skipping run");
                    return Err(JobError::Locked(job.name().to_string()));
                }
                Err(e) => {
                    error!(job = job.name(), lock_id, error = %e, "Failed to acquire advisory lock");
                    return Err(JobError::unexpected(e));
                }
            },
            None => None,
        };

        let outcome = self.execute(job, invocation).await;
        if let Some(lease) = lease {
            release(lease).await;
        }
        outcome
    }

    /// Run a job, swallowing the outcome after it has been recorded.
    pub async fn run(&self, job: &dyn Job, invocation: Invocation) -> bool {
        self.run_wrapped(job, invocation).await.is_ok()
    }

    /// Whether the lock is granted to any session.
    pub async fn is_locked(&self, lock_id: i64) -> bool {
        match self.locks.is_locked(lock_id).await {
            Ok(locked) => locked,
            Err(e) => {
                warn!(lock_id, error = %e, "Failed to read advisory locks");
                false
            }
        }
    }

    async fn execute(&self, job: &dyn Job, invocation: Invocation) -> JobOutcome {
        let run_id = job.generate_job_id();
        if let Err(e) = self.status.create(&run_id, &self.instance_id).await {
            error!(job = job.name(), run_id = %run_id, error = %e, "Failed to record job start");
            return Err(JobError::unexpected(e));
        }
        info!(job = job.name(), run_id = %run_id, "Job started");

        let ctx = JobContext {
            run_id: run_id.clone(),
            lock_id: invocation.lock_id,
            args: invocation.args,
        };
        let outcome = match AssertUnwindSafe(job.run(&ctx)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(JobError::Unexpected(panic_message(panic))),
        };

        let (status, details) = match &outcome {
            Ok(details) => {
                info!(job = job.name(), run_id = %run_id, "Job succeeded");
                (RunStatus::Succeeded, details.clone())
            }
            Err(e) => {
                let status = e.status();
                error!(job = job.name(), run_id = %run_id, status = %status, error = %e, "Job did not succeed");
                (status, e.to_string())
            }
        };
        if let Err(e) = self.status.update(&run_id, status, Some(&details)).await {
            error!(run_id = %run_id, error = %e, "Failed to record job status");
        }
        outcome
    }
}

async fn release(lease: Box<dyn LockLease>) {
    let lock_id = lease.lock_id();
    if let Err(e) = lease.release().await {
        error!(lock_id, error = %e, "Failed to release advisory lock");
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("panic: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panic: {}", msg)
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use loch_db::memory::{MemoryAdvisoryLocks, MemoryJobStatusRepo};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Test job with a scripted outcome and a call counter.
    pub(crate) struct ScriptedJob {
        pub name: &'static str,
        pub outcome: Option<JobError>,
        pub calls: AtomicUsize,
    }

    impl ScriptedJob {
        pub fn ok(name: &'static str) -> Self {
            Self {
                name,
                outcome: None,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn failing(name: &'static str, error: JobError) -> Self {
            Self {
                name,
                outcome: Some(error),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn name(&self) -> &str {
            self.name
        }

        async fn run(&self, _ctx: &JobContext) -> JobOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Some(e) => Err(e.clone()),
                None => Ok(format!("{} done", self.name)),
            }
        }
    }

    struct Panicking;

    #[async_trait]
    impl Job for Panicking {
        fn name(&self) -> &str {
            "Panicking"
        }

        async fn run(&self, _ctx: &JobContext) -> JobOutcome {
            panic!("body exploded");
        }
    }

    pub(crate) fn runner() -> (JobRunner, Arc<MemoryJobStatusRepo>, MemoryAdvisoryLocks) {
        let status = Arc::new(MemoryJobStatusRepo::new());
        let locks = MemoryAdvisoryLocks::new();
        let runner = JobRunner::new(status.clone(), Arc::new(locks.clone()), "test-host");
        (runner, status, locks)
    }

    async fn only_record(status: &MemoryJobStatusRepo, name: &str) -> loch_db::JobRunRecord {
        status.most_recent(name, None).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let (runner, status, _) = runner();
        let job = ScriptedJob::ok("SyncCanvasSnapshots");

        let outcome = runner.run_wrapped(&job, Invocation::default()).await;
        assert_eq!(outcome.unwrap(), "SyncCanvasSnapshots done");

        let record = only_record(&status, "SyncCanvasSnapshots").await;
        assert_eq!(record.run_status(), Some(RunStatus::Succeeded));
        assert_eq!(record.instance_id.as_deref(), Some("test-host"));
        assert_eq!(record.details.as_deref(), Some("SyncCanvasSnapshots done"));
    }

    #[tokio::test]
    async fn test_failures_map_to_status() {
        let (runner, status, _) = runner();

        let failed = ScriptedJob::failing("ImportDegreeProgress", JobError::failed("no rows"));
        assert!(!runner.run(&failed, Invocation::default()).await);
        let record = only_record(&status, "ImportDegreeProgress").await;
        assert_eq!(record.run_status(), Some(RunStatus::Failed));
        assert_eq!(record.details.as_deref(), Some("no rows"));

        let errored = ScriptedJob::failing("RefreshBoacCache", JobError::unexpected("db gone"));
        let outcome = runner.run_wrapped(&errored, Invocation::default()).await;
        assert!(matches!(outcome, Err(JobError::Unexpected(_))));
        let record = only_record(&status, "RefreshBoacCache").await;
        assert_eq!(record.run_status(), Some(RunStatus::Errored));
    }

    #[tokio::test]
    async fn test_panic_is_recorded_as_errored() {
        let (runner, status, _) = runner();

        let outcome = runner.run_wrapped(&Panicking, Invocation::default()).await;
        match outcome {
            Err(JobError::Unexpected(msg)) => assert!(msg.contains("body exploded")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let record = only_record(&status, "Panicking").await;
        assert_eq!(record.run_status(), Some(RunStatus::Errored));
    }

    #[tokio::test]
    async fn test_held_lock_refuses_run() {
        let (runner, status, locks) = runner();
        let job = ScriptedJob::ok("GenerateAllTables");
        let _held = locks.try_lock(3000).await.unwrap().unwrap();

        let outcome = runner
            .run_wrapped(&job, Invocation::locked(3000, JobArgs::new()))
            .await;
        assert!(matches!(outcome, Err(JobError::Locked(_))));
        assert_eq!(job.calls(), 0);
        assert!(status.most_recent("GenerateAllTables", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_released_on_every_exit_path() {
        let (runner, _, locks) = runner();

        let ok = ScriptedJob::ok("A");
        runner.run(&ok, Invocation::locked(1000, JobArgs::new())).await;
        assert!(!runner.is_locked(1000).await);

        let failing = ScriptedJob::failing("B", JobError::failed("x"));
        runner.run(&failing, Invocation::locked(1000, JobArgs::new())).await;
        assert!(!runner.is_locked(1000).await);

        runner.run(&Panicking, Invocation::locked(1000, JobArgs::new())).await;
        assert!(locks.granted_lock_ids().await.unwrap().is_empty());
    }
}
