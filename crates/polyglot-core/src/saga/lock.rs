//! Cross-step exclusion for a single saga: a Postgres advisory lock for
//! multi-process deployments, with an in-process fallback for tests and
//! single-node use. A saga's steps run under a held lock for the saga's
//! entire execution so two concurrent `execute`/`resume_saga` calls for the
//! same `saga_id` never interleave steps.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use polyglot_error::{Result, SagaError};
use uuid::Uuid;

/// Saga-scoped mutual exclusion.
#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Attempt to acquire the lock for `saga_id`, retrying with exponential
    /// backoff (`base_delay * 2^(attempt - 1)`) until `max_attempts` is
    /// exhausted. The default policy is 3 attempts totalling roughly 30s
    /// (`base_delay = 10s`); tests pass a much smaller base to stay fast.
    async fn acquire(&self, saga_id: Uuid, max_attempts: u32, base_delay: Duration) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if self.try_acquire(saga_id).await? {
                return Ok(());
            }
            if attempt >= max_attempts {
                return Err(SagaError::LockContention { saga_id, attempts: attempt }.into());
            }
            let backoff = base_delay.mul_f64(2f64.powi(attempt as i32 - 1));
            tokio::time::sleep(backoff).await;
        }
    }

    /// Non-blocking acquire attempt; `Ok(false)` means already held elsewhere.
    async fn try_acquire(&self, saga_id: Uuid) -> Result<bool>;

    /// Release a previously acquired lock. Idempotent.
    async fn release(&self, saga_id: Uuid) -> Result<()>;
}

fn saga_lock_key(saga_id: Uuid) -> i64 {
    let mut hasher = DefaultHasher::new();
    saga_id.hash(&mut hasher);
    hasher.finish() as i64
}

/// A `pg_try_advisory_lock`-backed [`AdvisoryLock`].
///
/// Postgres session-level advisory locks are tied to the physical
/// connection that took them: acquiring on one pooled connection and
/// releasing on another is a silent no-op. `held` keeps the
/// `deadpool_postgres::Object` the lock was acquired on checked out of the
/// pool until `release` runs, rather than re-borrowing from the pool per
/// call.
pub struct PostgresAdvisoryLock {
    pool: deadpool_postgres::Pool,
    held: DashMap<Uuid, deadpool_postgres::Object>,
}

impl PostgresAdvisoryLock {
    #[must_use]
    pub fn new(pool: deadpool_postgres::Pool) -> Self {
        Self { pool, held: DashMap::new() }
    }
}

#[async_trait]
impl AdvisoryLock for PostgresAdvisoryLock {
    async fn try_acquire(&self, saga_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await.map_err(|e| SagaError::Store(e.to_string()))?;
        let key = saga_lock_key(saga_id);
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        let acquired: bool = row.get(0);
        if acquired {
            self.held.insert(saga_id, client);
        }
        Ok(acquired)
    }

    async fn release(&self, saga_id: Uuid) -> Result<()> {
        let Some((_, client)) = self.held.remove(&saga_id) else {
            return Ok(());
        };
        let key = saga_lock_key(saga_id);
        client
            .execute("SELECT pg_advisory_unlock($1)", &[&key])
            .await
            .map_err(|e| SagaError::Store(e.to_string()))?;
        Ok(())
    }
}

/// An in-process fallback lock for deployments with no relational backend
/// configured. Only excludes concurrent tasks within this process — the
/// Design Notes' unresolved question of whether a silent single-process
/// downgrade is acceptable is resolved here by never being silent: every
/// acquire logs a warning naming the gap.
#[derive(Default)]
pub struct InProcessMutexLock {
    held: DashMap<Uuid, ()>,
}

impl InProcessMutexLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdvisoryLock for InProcessMutexLock {
    async fn try_acquire(&self, saga_id: Uuid) -> Result<bool> {
        tracing::warn!(
            %saga_id,
            "using in-process saga lock; concurrent instances of this process are NOT mutually excluded"
        );
        Ok(self.held.insert(saga_id, ()).is_none())
    }

    async fn release(&self, saga_id: Uuid) -> Result<()> {
        self.held.remove(&saga_id);
        Ok(())
    }
}
