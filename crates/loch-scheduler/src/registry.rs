//! Job registry: the explicit table of runnable job classes and the
//! schedulable job definitions built from them.

use std::collections::HashMap;
use std::sync::Arc;

use loch_core::{Job, JobArgs, JobId, JobTarget, lock_id_for};

use crate::chain::ChainedJob;

/// A schedulable job: an id with a lock, and what it runs.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    pub id: JobId,
    pub target: JobTarget,
    /// Default bound options.
    pub options: JobArgs,
}

impl JobDefinition {
    pub fn new(id: impl Into<JobId>, target: JobTarget) -> Self {
        Self {
            id: id.into(),
            target,
            options: JobArgs::new(),
        }
    }

    pub fn lock_id(&self) -> Option<i64> {
        lock_id_for(&self.id)
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<dyn Job>>,
    definitions: Vec<JobDefinition>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job class under its name, replacing any previous one.
    pub fn register(&mut self, job: Arc<dyn Job>) -> &mut Self {
        self.jobs.insert(job.name().to_string(), job);
        self
    }

    pub fn define(&mut self, definition: JobDefinition) -> &mut Self {
        self.definitions.retain(|d| d.id != definition.id);
        self.definitions.push(definition);
        self
    }

    pub fn contains(&self, class: &str) -> bool {
        self.jobs.contains_key(class)
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn Job>> {
        self.jobs.get(class).cloned()
    }

    pub fn definitions(&self) -> &[JobDefinition] {
        &self.definitions
    }

    pub fn definition(&self, id: &JobId) -> Option<&JobDefinition> {
        self.definitions.iter().find(|d| &d.id == id)
    }

    /// Whether every component of the target is registered.
    pub fn can_build(&self, target: &JobTarget) -> bool {
        target.components().iter().all(|c| self.contains(c))
    }

    /// Build the runnable for a target. Chains are named after the job id so
    /// their run records are correlated with the schedule entry.
    pub fn build(&self, id: &JobId, target: &JobTarget) -> Option<Arc<dyn Job>> {
        match target {
            JobTarget::Single(class) => self.get(class),
            JobTarget::Chain(classes) => {
                let steps = classes
                    .iter()
                    .map(|c| self.get(c))
                    .collect::<Option<Vec<_>>>()?;
                Some(Arc::new(ChainedJob::new(id.as_str(), steps)))
            }
        }
    }

    /// Resolve an HTTP command name. Schedulable definitions win and carry
    /// their lock id; otherwise a registered class by its command name.
    pub fn resolve_command(&self, command: &str) -> Option<(Arc<dyn Job>, Option<i64>)> {
        let command = command.trim().to_lowercase();
        if let Some(def) = self.definitions.iter().find(|d| d.id.command() == command) {
            return self
                .build(&def.id, &def.target)
                .map(|job| (job, def.lock_id()));
        }
        self.jobs
            .values()
            .find(|j| j.command() == command)
            .map(|job| (job.clone(), None))
    }
}
