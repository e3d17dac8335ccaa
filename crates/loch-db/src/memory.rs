//! In-memory repositories.
//!
//! Used when no database is configured and by tests. Locks are process-wide
//! rather than per session, which is all a single instance needs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use loch_core::job::truncate_details;
use loch_core::{JobId, RunStatus, ScheduledJob};

use crate::repo::status::run_id_prefix;
use crate::{AdvisoryLocks, DbError, DbResult, JobRunRecord, JobStatusRepo, LockLease, ScheduleRepo};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MemoryJobStatusRepo {
    records: Mutex<HashMap<String, JobRunRecord>>,
}

impl MemoryJobStatusRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as is, replacing any record with the same id.
    pub fn insert(&self, record: JobRunRecord) {
        lock(&self.records).insert(record.job_id.clone(), record);
    }

    fn sorted(&self, filter: impl Fn(&JobRunRecord) -> bool) -> Vec<JobRunRecord> {
        let mut records: Vec<JobRunRecord> = lock(&self.records)
            .values()
            .filter(|r| filter(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        records
    }
}

#[async_trait]
impl JobStatusRepo for MemoryJobStatusRepo {
    async fn create(&self, job_id: &str, instance_id: &str) -> DbResult<JobRunRecord> {
        let mut records = lock(&self.records);
        if records.contains_key(job_id) {
            return Err(DbError::Duplicate(format!("job run {}", job_id)));
        }
        let now = Utc::now();
        let record = JobRunRecord {
            job_id: job_id.to_string(),
            status: RunStatus::Started.as_str().to_string(),
            instance_id: Some(instance_id.to_string()),
            details: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(job_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update(
        &self,
        job_id: &str,
        status: RunStatus,
        details: Option<&str>,
    ) -> DbResult<()> {
        let mut records = lock(&self.records);
        let record = records
            .get_mut(job_id)
            .ok_or_else(|| DbError::NotFound(format!("job run {}", job_id)))?;
        record.status = status.as_str().to_string();
        record.details = details.map(|d| truncate_details(d).to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, job_id: &str) -> DbResult<JobRunRecord> {
        lock(&self.records)
            .get(job_id)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("job run {}", job_id)))
    }

    async fn most_recent(
        &self,
        name: &str,
        status: Option<RunStatus>,
    ) -> DbResult<Option<JobRunRecord>> {
        let prefix = run_id_prefix(name);
        let records = self.sorted(|r| {
            r.job_id.starts_with(&prefix) && status.is_none_or(|s| r.status == s.as_str())
        });
        Ok(records.into_iter().next_back())
    }

    async fn list_by_date(&self, date: NaiveDate) -> DbResult<Vec<JobRunRecord>> {
        Ok(self.sorted(|r| r.created_at.date_naive() == date))
    }
}

#[derive(Default)]
pub struct MemoryScheduleRepo {
    jobs: Mutex<BTreeMap<JobId, ScheduledJob>>,
}

impl MemoryScheduleRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepo for MemoryScheduleRepo {
    async fn list(&self) -> DbResult<Vec<ScheduledJob>> {
        let mut jobs: Vec<ScheduledJob> = lock(&self.jobs).values().cloned().collect();
        // Paused triggers last, matching the Postgres ordering.
        jobs.sort_by(|a, b| match (a.next_run_time, b.next_run_time) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.id.cmp(&b.id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.id.cmp(&b.id),
        });
        Ok(jobs)
    }

    async fn get(&self, id: &JobId) -> DbResult<Option<ScheduledJob>> {
        Ok(lock(&self.jobs).get(id).cloned())
    }

    async fn upsert(&self, job: &ScheduledJob) -> DbResult<()> {
        lock(&self.jobs).insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete(&self, id: &JobId) -> DbResult<bool> {
        Ok(lock(&self.jobs).remove(id).is_some())
    }

    async fn due(&self, now: DateTime<Utc>) -> DbResult<Vec<ScheduledJob>> {
        let mut due: Vec<ScheduledJob> = lock(&self.jobs)
            .values()
            .filter(|j| j.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|j| j.next_run_time);
        Ok(due)
    }

    async fn advance(
        &self,
        id: &JobId,
        expected: Option<DateTime<Utc>>,
        next: Option<DateTime<Utc>>,
    ) -> DbResult<bool> {
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(id) {
            Some(job) if job.next_run_time == expected => {
                job.next_run_time = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Process-local advisory locks.
#[derive(Clone, Default)]
pub struct MemoryAdvisoryLocks {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl MemoryAdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvisoryLocks for MemoryAdvisoryLocks {
    async fn try_lock(&self, lock_id: i64) -> DbResult<Option<Box<dyn LockLease>>> {
        if !lock(&self.held).insert(lock_id) {
            return Ok(None);
        }
        Ok(Some(Box::new(MemoryLockLease {
            lock_id,
            held: Arc::clone(&self.held),
        })))
    }

    async fn granted_lock_ids(&self) -> DbResult<Vec<i64>> {
        let mut ids: Vec<i64> = lock(&self.held).iter().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

struct MemoryLockLease {
    lock_id: i64,
    held: Arc<Mutex<HashSet<i64>>>,
}

#[async_trait]
impl LockLease for MemoryLockLease {
    fn lock_id(&self) -> i64 {
        self.lock_id
    }

    async fn release(self: Box<Self>) -> DbResult<()> {
        // Drop does the work.
        Ok(())
    }
}

impl Drop for MemoryLockLease {
    fn drop(&mut self) {
        lock(&self.held).remove(&self.lock_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use loch_core::{CronSpec, JobArgs, JobTarget};

    fn record(job_id: &str, status: RunStatus, created_at: DateTime<Utc>) -> JobRunRecord {
        JobRunRecord {
            job_id: job_id.to_string(),
            status: status.as_str().to_string(),
            instance_id: Some("test".to_string()),
            details: None,
            created_at,
            updated_at: created_at,
        }
    }

    fn scheduled(id: &str, next: Option<DateTime<Utc>>) -> ScheduledJob {
        ScheduledJob {
            id: JobId::new(id),
            target: JobTarget::Single("SyncCanvasSnapshots".to_string()),
            trigger: CronSpec::default(),
            options: JobArgs::new(),
            lock_id: None,
            next_run_time: next,
        }
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let repo = MemoryJobStatusRepo::new();
        let created = repo.create("SyncCanvasSnapshots_1_abcd", "host-a").await.unwrap();
        assert_eq!(created.run_status(), Some(RunStatus::Started));

        repo.update("SyncCanvasSnapshots_1_abcd", RunStatus::Succeeded, Some("done"))
            .await
            .unwrap();
        let record = repo.get("SyncCanvasSnapshots_1_abcd").await.unwrap();
        assert_eq!(record.run_status(), Some(RunStatus::Succeeded));
        assert_eq!(record.details.as_deref(), Some("done"));
        assert_eq!(record.instance_id.as_deref(), Some("host-a"));
    }

    #[tokio::test]
    async fn test_status_duplicate_and_missing() {
        let repo = MemoryJobStatusRepo::new();
        repo.create("A_1_x", "h").await.unwrap();
        assert!(matches!(repo.create("A_1_x", "h").await, Err(DbError::Duplicate(_))));
        assert!(matches!(
            repo.update("B_1_x", RunStatus::Failed, None).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_details_truncated() {
        let repo = MemoryJobStatusRepo::new();
        repo.create("A_1_x", "h").await.unwrap();
        let long = "x".repeat(10_000);
        repo.update("A_1_x", RunStatus::Failed, Some(&long)).await.unwrap();
        let record = repo.get("A_1_x").await.unwrap();
        assert_eq!(record.details.map(|d| d.len()), Some(loch_core::job::MAX_DETAILS_LEN));
    }

    #[tokio::test]
    async fn test_most_recent_matches_name_prefix() {
        let repo = MemoryJobStatusRepo::new();
        let now = Utc::now();
        repo.insert(record("Sync_1_a", RunStatus::Succeeded, now - Duration::hours(3)));
        repo.insert(record("Sync_2_b", RunStatus::Started, now - Duration::hours(2)));
        repo.insert(record("SyncOther_3_c", RunStatus::Started, now));

        let latest = repo.most_recent("Sync", None).await.unwrap().unwrap();
        assert_eq!(latest.job_id, "Sync_2_b");

        let succeeded = repo
            .most_recent("Sync", Some(RunStatus::Succeeded))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(succeeded.job_id, "Sync_1_a");

        assert!(repo.most_recent("Missing", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_date() {
        let repo = MemoryJobStatusRepo::new();
        let now = Utc::now();
        repo.insert(record("A_2_b", RunStatus::Succeeded, now));
        repo.insert(record("A_1_a", RunStatus::Failed, now - Duration::days(2)));

        let today = repo.list_by_date(now.date_naive()).await.unwrap();
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].job_id, "A_2_b");
    }

    #[tokio::test]
    async fn test_schedule_upsert_and_due() {
        let repo = MemoryScheduleRepo::new();
        let now = Utc::now();
        repo.upsert(&scheduled("job_b", Some(now - Duration::seconds(5)))).await.unwrap();
        repo.upsert(&scheduled("job_a", None)).await.unwrap();
        repo.upsert(&scheduled("job_c", Some(now + Duration::hours(1)))).await.unwrap();

        let listed: Vec<String> = repo
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id.to_string())
            .collect();
        assert_eq!(listed, vec!["JOB_B", "JOB_C", "JOB_A"]);

        let due = repo.due(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, JobId::new("JOB_B"));

        assert!(repo.delete(&JobId::new("job_b")).await.unwrap());
        assert!(!repo.delete(&JobId::new("job_b")).await.unwrap());
    }

    #[tokio::test]
    async fn test_schedule_advance_is_conditional() {
        let repo = MemoryScheduleRepo::new();
        let now = Utc::now();
        let later = now + Duration::hours(1);
        repo.upsert(&scheduled("JOB_A", Some(now))).await.unwrap();

        assert!(repo.advance(&JobId::new("JOB_A"), Some(now), Some(later)).await.unwrap());
        assert_eq!(repo.get(&JobId::new("JOB_A")).await.unwrap().unwrap().next_run_time, Some(later));

        // A write based on the old next run time loses.
        assert!(!repo.advance(&JobId::new("JOB_A"), Some(now), None).await.unwrap());
        assert_eq!(repo.get(&JobId::new("JOB_A")).await.unwrap().unwrap().next_run_time, Some(later));
        assert!(!repo.advance(&JobId::new("JOB_MISSING"), None, None).await.unwrap());
    }

    #[tokio::test]
    async fn test_advisory_lock_exclusive() {
        let locks = MemoryAdvisoryLocks::new();
        let lease = locks.try_lock(1000).await.unwrap().unwrap();
        assert!(locks.try_lock(1000).await.unwrap().is_none());
        assert!(locks.is_locked(1000).await.unwrap());
        assert_eq!(locks.granted_lock_ids().await.unwrap(), vec![1000]);

        lease.release().await.unwrap();
        assert!(!locks.is_locked(1000).await.unwrap());
        assert!(locks.try_lock(1000).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_dropped_lease_frees_lock() {
        let locks = MemoryAdvisoryLocks::new();
        {
            let _lease = locks.try_lock(2000).await.unwrap().unwrap();
        }
        assert!(locks.granted_lock_ids().await.unwrap().is_empty());
    }
}
