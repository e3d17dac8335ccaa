//! Non-blocking job triggering.

use std::sync::Arc;

use loch_core::{Job, JobError};
use tracing::{info, warn};

use crate::queue::ExecutionQueue;
use crate::runner::{Invocation, JobRunner};

/// How accepted jobs are executed.
pub enum LaunchMode {
    /// Hand off to the worker-local queue.
    Queue(ExecutionQueue),
    /// Spawn a task per job.
    Background,
    /// Run to completion before returning.
    Inline,
}

pub struct Launcher {
    runner: Arc<JobRunner>,
    mode: LaunchMode,
}

impl Launcher {
    pub fn new(runner: Arc<JobRunner>, mode: LaunchMode) -> Self {
        Self { runner, mode }
    }

    /// Queue mode when enabled, otherwise a task per job.
    pub fn for_settings(runner: Arc<JobRunner>, queue_enabled: bool, threads: usize) -> Self {
        let mode = if queue_enabled {
            LaunchMode::Queue(ExecutionQueue::start(runner.clone(), threads))
        } else {
            LaunchMode::Background
        };
        Self::new(runner, mode)
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Accept a job for execution. Returns false when the job's lock is
    /// already held or the queue is closed. The outcome of an accepted job is
    /// only visible in the status store.
    pub async fn run_async(&self, job: Arc<dyn Job>, invocation: Invocation) -> bool {
        if let Some(lock_id) = invocation.lock_id {
            if self.runner.is_locked(lock_id).await {
                warn!(job = job.name(), lock_id, "Job is already running; not starting");
                return false;
            }
        }

        match &self.mode {
            LaunchMode::Queue(queue) => queue.enqueue(job, invocation),
            LaunchMode::Background => {
                let runner = self.runner.clone();
                info!(job = job.name(), "Starting job in background");
                tokio::spawn(async move {
                    runner.run(job.as_ref(), invocation).await;
                });
                true
            }
            LaunchMode::Inline => !matches!(
                self.runner.run_wrapped(job.as_ref(), invocation).await,
                Err(JobError::Locked(_))
            ),
        }
    }

    pub async fn shutdown(&self) {
        if let LaunchMode::Queue(queue) = &self.mode {
            queue.shutdown().await;
        }
    }
}
