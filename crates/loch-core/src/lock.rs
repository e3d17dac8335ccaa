//! Advisory lock registry.
//!
//! Postgres advisory locks require numeric ids. Every schedulable job id maps
//! to one fixed integer here; the numbers are part of the persisted schedule
//! and must never be reassigned to a different job.

use crate::JobId;

pub const ADVISORY_LOCK_IDS: &[(&str, i64)] = &[
    ("JOB_SYNC_CANVAS_SNAPSHOTS", 1000),
    ("JOB_RESYNC_CANVAS_SNAPSHOTS", 1500),
    ("JOB_IMPORT_STUDENT_POPULATION", 2000),
    ("JOB_IMPORT_DEGREE_PROGRESS", 2500),
    ("JOB_IMPORT_SIS_ENROLLMENTS", 2600),
    ("JOB_IMPORT_SIS_STUDENTS", 2700),
    ("JOB_GENERATE_ALL_TABLES", 3000),
    ("JOB_GENERATE_CURRENT_TERM_FEEDS", 3500),
    ("JOB_REFRESH_BOAC_CACHE", 4000),
];

/// Look up the advisory lock id for a job.
pub fn lock_id_for(id: &JobId) -> Option<i64> {
    ADVISORY_LOCK_IDS
        .iter()
        .find(|(name, _)| *name == id.as_str())
        .map(|(_, lock_id)| *lock_id)
}
