//! Job run status repository.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use loch_core::RunStatus;
use loch_core::job::truncate_details;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::{DbError, DbResult};

/// One execution attempt of a job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRunRecord {
    pub job_id: String,
    pub status: String,
    pub instance_id: Option<String>,
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRunRecord {
    pub fn run_status(&self) -> Option<RunStatus> {
        self.status.parse().ok()
    }
}

#[async_trait]
pub trait JobStatusRepo: Send + Sync {
    /// Record a run as `started`.
    async fn create(&self, job_id: &str, instance_id: &str) -> DbResult<JobRunRecord>;
    /// Move a run to a new status. Details are truncated to the column size.
    async fn update(&self, job_id: &str, status: RunStatus, details: Option<&str>)
    -> DbResult<()>;
    async fn get(&self, job_id: &str) -> DbResult<JobRunRecord>;
    /// Most recent run of the named job, optionally restricted to a status.
    async fn most_recent(
        &self,
        name: &str,
        status: Option<RunStatus>,
    ) -> DbResult<Option<JobRunRecord>>;
    /// Runs created on the given date, oldest first.
    async fn list_by_date(&self, date: NaiveDate) -> DbResult<Vec<JobRunRecord>>;
}

/// Prefix shared by every run id of the named job.
pub(crate) fn run_id_prefix(name: &str) -> String {
    format!("{}_", name)
}

/// PostgreSQL implementation of JobStatusRepo.
pub struct PgJobStatusRepo {
    pool: PgPool,
}

impl PgJobStatusRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStatusRepo for PgJobStatusRepo {
    async fn create(&self, job_id: &str, instance_id: &str) -> DbResult<JobRunRecord> {
        let record = sqlx::query_as::<_, JobRunRecord>(
            r#"
            INSERT INTO background_job_status (job_id, status, instance_id, created_at, updated_at)
            VALUES ($1, $2, $3, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(RunStatus::Started.as_str())
        .bind(instance_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DbError::Duplicate(format!("job run {}", job_id))
            }
            other => DbError::Database(other),
        })?;
        Ok(record)
    }

    async fn update(
        &self,
        job_id: &str,
        status: RunStatus,
        details: Option<&str>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE background_job_status
            SET status = $2, details = $3, updated_at = NOW()
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(details.map(truncate_details))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("job run {}", job_id)));
        }
        Ok(())
    }

    async fn get(&self, job_id: &str) -> DbResult<JobRunRecord> {
        let record = sqlx::query_as::<_, JobRunRecord>(
            "SELECT * FROM background_job_status WHERE job_id = $1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job run {}", job_id)))?;
        Ok(record)
    }

    async fn most_recent(
        &self,
        name: &str,
        status: Option<RunStatus>,
    ) -> DbResult<Option<JobRunRecord>> {
        let record = sqlx::query_as::<_, JobRunRecord>(
            r#"
            SELECT * FROM background_job_status
            WHERE left(job_id, length($1)) = $1
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(run_id_prefix(name))
        .bind(status.map(|s| s.as_str()))
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    async fn list_by_date(&self, date: NaiveDate) -> DbResult<Vec<JobRunRecord>> {
        let records = sqlx::query_as::<_, JobRunRecord>(
            r#"
            SELECT * FROM background_job_status
            WHERE created_at::date = $1
            ORDER BY created_at
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
