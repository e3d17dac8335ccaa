//! Postgres advisory locks.
//!
//! Advisory locks are session scoped, so a lease keeps the pooled connection
//! it was granted on until released. A lease dropped without release closes
//! that connection and the server frees the lock with the session.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres};
use tracing::warn;

use crate::DbResult;

/// A held advisory lock.
#[async_trait]
pub trait LockLease: Send {
    fn lock_id(&self) -> i64;

    /// Release the lock on the session that holds it.
    async fn release(self: Box<Self>) -> DbResult<()>;
}

#[async_trait]
pub trait AdvisoryLocks: Send + Sync {
    /// Try to take the lock without waiting. `None` if another session holds it.
    async fn try_lock(&self, lock_id: i64) -> DbResult<Option<Box<dyn LockLease>>>;

    /// Lock ids currently granted to any session.
    async fn granted_lock_ids(&self) -> DbResult<Vec<i64>>;

    async fn is_locked(&self, lock_id: i64) -> DbResult<bool> {
        Ok(self.granted_lock_ids().await?.contains(&lock_id))
    }
}

/// PostgreSQL implementation of AdvisoryLocks.
pub struct PgAdvisoryLocks {
    pool: PgPool,
}

impl PgAdvisoryLocks {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdvisoryLocks for PgAdvisoryLocks {
    async fn try_lock(&self, lock_id: i64) -> DbResult<Option<Box<dyn LockLease>>> {
        let mut conn = self.pool.acquire().await?;
        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(lock_id)
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            return Ok(None);
        }
        Ok(Some(Box::new(PgLockLease {
            lock_id,
            conn: Some(conn),
        })))
    }

    async fn granted_lock_ids(&self) -> DbResult<Vec<i64>> {
        // objsubid = 1 marks single bigint keys, split over classid and objid.
        let keys: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT classid::bigint, objid::bigint FROM pg_locks
            WHERE locktype = 'advisory' AND granted = true AND objsubid = 1
              AND database = (SELECT oid FROM pg_database WHERE datname = current_database())
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(keys
            .into_iter()
            .map(|(high, low)| advisory_key(high, low))
            .collect())
    }
}

/// Rebuild a bigint advisory key from the two 32-bit halves `pg_locks` reports.
fn advisory_key(high: i64, low: i64) -> i64 {
    (((high as u64) << 32) | (low as u64 & 0xFFFF_FFFF)) as i64
}

pub struct PgLockLease {
    lock_id: i64,
    conn: Option<PoolConnection<Postgres>>,
}

#[async_trait]
impl LockLease for PgLockLease {
    fn lock_id(&self) -> i64 {
        self.lock_id
    }

    async fn release(mut self: Box<Self>) -> DbResult<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        // Drain duplicate grants taken on this session.
        loop {
            let (unlocked,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
                .bind(self.lock_id)
                .fetch_one(&mut *conn)
                .await?;
            if !unlocked {
                return Ok(());
            }
        }
    }
}

impl Drop for PgLockLease {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(lock_id = self.lock_id, "Advisory lock dropped without release; closing session");
            drop(conn.detach());
        }
    }
}
