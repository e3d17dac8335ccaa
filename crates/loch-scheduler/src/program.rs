//! Job bodies implemented by external programs.

use async_trait::async_trait;
use loch_core::{Job, JobContext, JobError, JobOutcome};
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, error};

/// Environment variable carrying the run id.
pub const JOB_ID_ENV: &str = "LOCH_JOB_ID";
/// Environment variable carrying the bound options as a JSON object.
pub const JOB_ARGS_ENV: &str = "LOCH_JOB_ARGS";

/// Runs a program to completion. A zero exit status is success and the
/// program's output becomes the run's details.
pub struct ProgramJob {
    class: String,
    path: String,
    args: Vec<String>,
}

impl ProgramJob {
    pub fn new(class: impl Into<String>, path: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            class: class.into(),
            path: path.into(),
            args,
        }
    }
}

#[async_trait]
impl Job for ProgramJob {
    fn name(&self) -> &str {
        &self.class
    }

    async fn run(&self, ctx: &JobContext) -> JobOutcome {
        debug!(job = %self.class, path = %self.path, "Running job program");
        let output = Command::new(&self.path)
            .args(&self.args)
            .env(JOB_ID_ENV, &ctx.run_id)
            .env(JOB_ARGS_ENV, Value::Object(ctx.args.clone()).to_string())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| JobError::unexpected(format!("failed to start {}: {}", self.path, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if !output.status.success() {
            error!(job = %self.class, status = %output.status, stderr = %stderr, "Job program failed");
            let details = if stderr.is_empty() { stdout } else { stderr };
            return Err(JobError::failed(format!("{}: {}", output.status, details)));
        }
        Ok(stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loch_core::JobArgs;

    fn ctx(args: JobArgs) -> JobContext {
        JobContext {
            run_id: "ImportDegreeProgress_1_abcdef01".to_string(),
            lock_id: Some(2500),
            args,
        }
    }

    #[tokio::test]
    async fn test_program_receives_run_id_and_args() {
        let job = ProgramJob::new(
            "ImportDegreeProgress",
            "/bin/sh",
            vec![
                "-c".to_string(),
                "echo \"$LOCH_JOB_ID $LOCH_JOB_ARGS\"".to_string(),
            ],
        );
        let mut args = JobArgs::new();
        args.insert("term_id".to_string(), Value::from("2178"));

        let details = job.run(&ctx(args)).await.unwrap();
        assert_eq!(details, r#"ImportDegreeProgress_1_abcdef01 {"term_id":"2178"}"#);
    }

    #[tokio::test]
    async fn test_nonzero_exit_fails() {
        let job = ProgramJob::new(
            "ImportDegreeProgress",
            "/bin/sh",
            vec!["-c".to_string(), "echo 'no feed' >&2; exit 3".to_string()],
        );
        match job.run(&ctx(JobArgs::new())).await {
            Err(JobError::Failed(msg)) => assert!(msg.contains("no feed")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_unexpected() {
        let job = ProgramJob::new("Missing", "/nonexistent/loch-job", Vec::new());
        assert!(matches!(
            job.run(&ctx(JobArgs::new())).await,
            Err(JobError::Unexpected(_))
        ));
    }
}
