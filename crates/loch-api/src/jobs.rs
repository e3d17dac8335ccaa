//! The schedulable job catalog and the registry built from configuration.

use std::sync::Arc;

use loch_config::{JobBody, Settings};
use loch_core::JobTarget;
use loch_scheduler::{DispatchJob, Dispatcher, JobDefinition, JobRegistry, ProgramJob};
use tracing::info;

/// Schedulable job ids and the classes they run. Chains run their classes
/// in order under the id's lock.
pub const CATALOG: &[(&str, &[&str])] = &[
    ("JOB_SYNC_CANVAS_SNAPSHOTS", &["SyncCanvasSnapshots"]),
    ("JOB_RESYNC_CANVAS_SNAPSHOTS", &["ResyncCanvasSnapshots"]),
    (
        "JOB_IMPORT_STUDENT_POPULATION",
        &[
            "CreateCoeSchema",
            "ImportAscAthletes",
            "GenerateAscProfiles",
            "ImportCalNetData",
            "CreateCalNetSchema",
        ],
    ),
    ("JOB_IMPORT_DEGREE_PROGRESS", &["ImportDegreeProgress"]),
    ("JOB_IMPORT_SIS_ENROLLMENTS", &["ImportSisEnrollmentsApi"]),
    ("JOB_IMPORT_SIS_STUDENTS", &["ImportSisStudentApi"]),
    (
        "JOB_GENERATE_ALL_TABLES",
        &[
            "CreateCanvasSchema",
            "CreateSisSchema",
            "GenerateIntermediateTables",
            "GenerateBoacAnalytics",
        ],
    ),
    ("JOB_GENERATE_CURRENT_TERM_FEEDS", &["GenerateMergedStudentFeeds"]),
    ("JOB_REFRESH_BOAC_CACHE", &["RefreshBoacCache"]),
];

pub fn catalog() -> Vec<JobDefinition> {
    CATALOG
        .iter()
        .map(|(id, classes)| {
            let target = match *classes {
                [single] => JobTarget::Single(single.to_string()),
                many => JobTarget::Chain(many.iter().map(|c| c.to_string()).collect()),
            };
            JobDefinition::new(*id, target)
        })
        .collect()
}

/// Register the configured job bodies and define the catalog.
pub fn build_registry(settings: &Settings, dispatcher: Arc<Dispatcher>) -> JobRegistry {
    let mut registry = JobRegistry::new();
    for body in &settings.job_bodies {
        match body {
            JobBody::Program { class, path, args } => {
                registry.register(Arc::new(ProgramJob::new(class, path, args.clone())));
            }
            JobBody::Remote { class, command } => {
                registry.register(Arc::new(DispatchJob::new(
                    class,
                    command,
                    dispatcher.clone(),
                )));
            }
        }
    }
    for definition in catalog() {
        registry.define(definition);
    }
    info!(
        bodies = settings.job_bodies.len(),
        definitions = registry.definitions().len(),
        "Job registry built"
    );
    registry
}
