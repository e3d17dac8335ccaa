//! Worker-local execution queue.
//!
//! A fixed pool of tasks pulls from one unbounded FIFO. Arrival order is
//! kept by the queue, but two items may run concurrently on different
//! workers.

use std::sync::{Arc, Mutex as StdMutex};

use loch_core::Job;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::runner::{Invocation, JobRunner};

struct QueuedJob {
    job: Arc<dyn Job>,
    invocation: Invocation,
}

pub struct ExecutionQueue {
    tx: StdMutex<Option<mpsc::UnboundedSender<QueuedJob>>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
}

impl ExecutionQueue {
    /// Start `threads` workers sharing one queue.
    pub fn start(runner: Arc<JobRunner>, threads: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..threads.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let runner = runner.clone();
                tokio::spawn(async move {
                    info!(worker_id, "Starting queue worker");
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some(item) = next else {
                            debug!(worker_id, "Queue closed; worker exiting");
                            break;
                        };
                        debug!(worker_id, job = item.job.name(), "Dequeued job");
                        runner.run(item.job.as_ref(), item.invocation).await;
                    }
                })
            })
            .collect();

        Self {
            tx: StdMutex::new(Some(tx)),
            workers: StdMutex::new(workers),
        }
    }

    /// Append a job to the queue. Returns false only once the queue is shut down.
    pub fn enqueue(&self, job: Arc<dyn Job>, invocation: Invocation) -> bool {
        let name = job.name().to_string();
        let sent = match guard(&self.tx).as_ref() {
            Some(tx) => tx.send(QueuedJob { job, invocation }).is_ok(),
            None => false,
        };
        if sent {
            info!(job = %name, "Job enqueued");
        } else {
            warn!(job = %name, "Execution queue is closed");
        }
        sent
    }

    pub fn worker_count(&self) -> usize {
        guard(&self.workers).len()
    }

    /// Stop accepting jobs and wait for queued ones to drain.
    pub async fn shutdown(&self) {
        drop(guard(&self.tx).take());
        let workers = std::mem::take(&mut *guard(&self.workers));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Queue worker ended abnormally");
            }
        }
    }
}

fn guard<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
