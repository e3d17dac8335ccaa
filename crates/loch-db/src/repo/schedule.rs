//! Persisted cron trigger repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use loch_core::{CronSpec, JobArgs, JobId, JobTarget, ScheduledJob};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::DbResult;

#[async_trait]
pub trait ScheduleRepo: Send + Sync {
    async fn list(&self) -> DbResult<Vec<ScheduledJob>>;
    async fn get(&self, id: &JobId) -> DbResult<Option<ScheduledJob>>;
    /// Insert or replace the trigger with the same id.
    async fn upsert(&self, job: &ScheduledJob) -> DbResult<()>;
    /// Returns false when no trigger had this id.
    async fn delete(&self, id: &JobId) -> DbResult<bool>;
    /// Triggers whose next run time is at or before `now`.
    async fn due(&self, now: DateTime<Utc>) -> DbResult<Vec<ScheduledJob>>;
    /// Move a trigger's next run time from `expected` to `next`. Returns false,
    /// writing nothing, if the stored next run time is no longer `expected`.
    async fn advance(
        &self,
        id: &JobId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> DbResult<bool>;
}

#[derive(sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    target: Json<JobTarget>,
    trigger_spec: Json<CronSpec>,
    options: Json<JobArgs>,
    lock_id: Option<i64>,
    next_run_time: Option<DateTime<Utc>>,
}

impl From<ScheduleRow> for ScheduledJob {
    fn from(row: ScheduleRow) -> Self {
        ScheduledJob {
            id: JobId::new(row.id),
            target: row.target.0,
            trigger: row.trigger_spec.0,
            options: row.options.0,
            lock_id: row.lock_id,
            next_run_time: row.next_run_time,
        }
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, target, trigger_spec, options, lock_id, next_run_time FROM job_schedules";

/// PostgreSQL implementation of ScheduleRepo.
pub struct PgScheduleRepo {
    pool: PgPool,
}

impl PgScheduleRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScheduleRepo for PgScheduleRepo {
    async fn list(&self) -> DbResult<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "{} ORDER BY next_run_time NULLS LAST, id",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScheduledJob::from).collect())
    }

    async fn get(&self, id: &JobId) -> DbResult<Option<ScheduledJob>> {
        let row = sqlx::query_as::<_, ScheduleRow>(&format!("{} WHERE id = $1", SELECT_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ScheduledJob::from))
    }

    async fn upsert(&self, job: &ScheduledJob) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_schedules (id, target, trigger_spec, options, lock_id, next_run_time, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (id) DO UPDATE SET
                target = EXCLUDED.target,
                trigger_spec = EXCLUDED.trigger_spec,
                options = EXCLUDED.options,
                lock_id = EXCLUDED.lock_id,
                next_run_time = EXCLUDED.next_run_time,
                updated_at = NOW()
            "#,
        )
        .bind(job.id.as_str())
        .bind(Json(&job.target))
        .bind(Json(&job.trigger))
        .bind(Json(&job.options))
        .bind(job.lock_id)
        .bind(job.next_run_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM job_schedules WHERE id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due(&self, now: DateTime<Utc>) -> DbResult<Vec<ScheduledJob>> {
        let rows = sqlx::query_as::<_, ScheduleRow>(&format!(
            "{} WHERE next_run_time IS NOT NULL AND next_run_time <= $1 ORDER BY next_run_time",
            SELECT_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ScheduledJob::from).collect())
    }

    async fn advance(
        &self,
        id: &JobId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_schedules SET next_run_time = $2, updated_at = NOW()
            WHERE id = $1 AND next_run_time IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(id.as_str())
        .bind(next)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
