//! Chained jobs: an ordered list of jobs run as one unit.
//!
//! The chain is wrapped once by the runner, so every step shares the chain's
//! run record and advisory lock. Steps never take the lock themselves.

use std::sync::Arc;

use async_trait::async_trait;
use loch_core::{Job, JobContext, JobError, JobOutcome};
use tracing::{error, info};

/// State of a step during chain execution.
#[derive(Debug, Clone, PartialEq)]
pub enum StepState {
    Pending,
    Succeeded,
    Failed { message: String },
}

pub struct ChainedJob {
    name: String,
    steps: Vec<Arc<dyn Job>>,
}

impl ChainedJob {
    pub fn new(name: impl Into<String>, steps: Vec<Arc<dyn Job>>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step in order and report the state each one ended in.
    /// Steps after the first failure stay `Pending`.
    pub async fn run_steps(&self, ctx: &JobContext) -> (Vec<StepState>, JobOutcome) {
        let mut states = vec![StepState::Pending; self.steps.len()];
        let mut last = String::new();

        for (idx, step) in self.steps.iter().enumerate() {
            info!(chain = %self.name, step = step.name(), index = idx, "Running chain step");
            match step.run(ctx).await {
                Ok(output) => {
                    states[idx] = StepState::Succeeded;
                    last = output;
                }
                Err(e) => {
                    error!(chain = %self.name, step = step.name(), error = %e, "Chain step failed; stopping chain");
                    states[idx] = StepState::Failed {
                        message: e.to_string(),
                    };
                    let err = match e {
                        JobError::Unexpected(msg) => {
                            JobError::Unexpected(format!("{} failed: {}", step.name(), msg))
                        }
                        other => JobError::Failed(format!("{} failed: {}", step.name(), other)),
                    };
                    return (states, Err(err));
                }
            }
        }
        (states, Ok(last))
    }
}

#[async_trait]
impl Job for ChainedJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        self.run_steps(ctx).await.1
    }
}
