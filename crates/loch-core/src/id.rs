//! Job identifiers.

use chrono::Utc;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a schedulable job, e.g. `JOB_SYNC_CANVAS_SNAPSHOTS`.
///
/// Ids are stored uppercase so that external callers can address a job
/// case-insensitively. The lowercase form is what the HTTP API reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(from = "String", into = "String")]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().trim().to_uppercase())
    }

    /// Canonical uppercase key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used at the public query boundary.
    pub fn public(&self) -> String {
        self.0.to_lowercase()
    }

    /// Command name used to trigger this job over HTTP:
    /// `JOB_GENERATE_ALL_TABLES` becomes `generate_all_tables`.
    pub fn command(&self) -> String {
        let lower = self.public();
        match lower.strip_prefix("job_") {
            Some(rest) => rest.to_string(),
            None => lower,
        }
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}

/// Generate a run id of the form `{name}_{epochSeconds}_{suffix}`.
///
/// Second granularity alone lets two same-named runs started within one
/// second collide in the status store, so eight random hex characters follow
/// the timestamp.
pub fn generate_run_id(name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", name, Utc::now().timestamp(), &suffix[..8])
}

/// Convert a CamelCase job class name to its snake_case command name.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let chars: Vec<char> = name.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if prev_lower || (prev_upper && next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_case_insensitive() {
        let a = JobId::new("job_sync_canvas_snapshots");
        let b = JobId::new("JOB_SYNC_CANVAS_SNAPSHOTS");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "JOB_SYNC_CANVAS_SNAPSHOTS");
        assert_eq!(a.public(), "job_sync_canvas_snapshots");
    }

    #[test]
    fn test_command_strips_job_prefix() {
        assert_eq!(
            JobId::new("JOB_GENERATE_ALL_TABLES").command(),
            "generate_all_tables"
        );
        assert_eq!(JobId::new("nightly").command(), "nightly");
    }

    #[test]
    fn test_run_id_prefix() {
        let id = generate_run_id("SyncCanvasSnapshots");
        let parts: Vec<&str> = id.rsplitn(3, '_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2], "SyncCanvasSnapshots");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[0].len(), 8);
        assert_ne!(id, generate_run_id("SyncCanvasSnapshots"));
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("CreateCanvasSchema"), "create_canvas_schema");
        assert_eq!(snake_case("ImportSisStudentApi"), "import_sis_student_api");
        assert_eq!(snake_case("RefreshBOACCache"), "refresh_boac_cache");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }
}
