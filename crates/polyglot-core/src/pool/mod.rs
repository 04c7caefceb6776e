//! Connection Pool.
//!
//! A bounded, thread-safe pool for the relational adapter's connections, with
//! validation-query health checks on lease and exponential-backoff retry on
//! connect failure. Generic over the concrete connection type so the same
//! pool shape can back any relational driver; `deadpool-postgres` supplies
//! the concrete Postgres connection source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use polyglot_error::{PersistenceError, PoolError, Result};
use tokio::time::sleep;

use crate::backend::PoolMetrics;

/// A connection that can validate its own liveness and reset its transaction
/// state before being returned to the pool.
#[async_trait::async_trait]
pub trait PoolableConnection: Send + Sync + 'static {
    /// Run the pool's validation query (e.g. `SELECT 1`) against this
    /// connection. `Ok(())` means the connection is healthy.
    async fn validate(&self) -> Result<()>;

    /// Roll back any open transaction. Called on every release, regardless
    /// of whether the lease committed, so a leaked transaction never survives
    /// into the next lease.
    async fn reset(&self) -> Result<()>;
}

/// Factory used by the pool to establish new connections.
#[async_trait::async_trait]
pub trait ConnectionFactory<C: PoolableConnection>: Send + Sync {
    async fn connect(&self) -> Result<C>;
}

/// Bounded connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub connect_timeout: Duration,
    pub lease_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 5,
            max_size: 50,
            connect_timeout: Duration::from_secs(10),
            lease_timeout: Duration::from_secs(30),
        }
    }
}

struct PoolState<C> {
    idle: VecDeque<C>,
    active_count: usize,
}

/// A bounded pool of `C` connections, validated on lease and reset on
/// release. Leases are tied to [`PooledConnection`]'s `Drop` impl, so a
/// connection is always returned (or discarded, if it failed validation)
/// even if the caller's future is cancelled or panics.
pub struct ConnectionPool<C: PoolableConnection, F: ConnectionFactory<C>> {
    config: PoolConfig,
    factory: F,
    state: Mutex<PoolState<C>>,
    semaphore: tokio::sync::Semaphore,
    created_total: AtomicU64,
    reused_total: AtomicU64,
    errors_total: AtomicU64,
    closed: std::sync::atomic::AtomicBool,
}

impl<C: PoolableConnection, F: ConnectionFactory<C>> ConnectionPool<C, F> {
    /// Construct a pool. Connections are created lazily on first lease, not
    /// eagerly at construction, so building a `ConnectionPool` never blocks
    /// on network I/O.
    #[must_use]
    pub fn new(factory: F, config: PoolConfig) -> Self {
        let max_size = config.max_size;
        Self {
            config,
            factory,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active_count: 0,
            }),
            semaphore: tokio::sync::Semaphore::new(max_size),
            created_total: AtomicU64::new(0),
            reused_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Lease a connection, blocking until one is available or
    /// `config.lease_timeout` elapses. A connection is validated before it's
    /// handed out; a failed validation discards it and retries with a fresh
    /// connection rather than surfacing the staleness to the caller.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` if the pool has been shut down, or
    /// `PoolError::Exhausted` if no connection became available before the
    /// lease deadline.
    pub async fn lease(&self) -> Result<PooledConnection<'_, C, F>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed.into());
        }

        let permit = tokio::time::timeout(self.config.lease_timeout, self.semaphore.acquire())
            .await
            .map_err(|_| PersistenceError::from(PoolError::Exhausted))?
            .map_err(|_| PersistenceError::from(PoolError::Closed))?;
        permit.forget();

        loop {
            let existing = self.state.lock().idle.pop_front();
            let conn = if let Some(conn) = existing {
                if conn.validate().await.is_ok() {
                    self.reused_total.fetch_add(1, Ordering::Relaxed);
                    conn
                } else {
                    tracing::warn!("stale connection detected, refreshing");
                    self.connect_with_retry().await?
                }
            } else {
                self.connect_with_retry().await?
            };
            {
                let mut state = self.state.lock();
                state.active_count += 1;
            }
            return Ok(PooledConnection {
                pool: self,
                conn: Some(conn),
            });
        }
    }

    /// Exponential backoff connect retry: 1s, 2s, 4s, up to 3 attempts.
    async fn connect_with_retry(&self) -> Result<C> {
        let max_attempts = 3u32;
        let mut last_error = String::new();
        for attempt in 0..max_attempts {
            match tokio::time::timeout(self.config.connect_timeout, self.factory.connect()).await {
                Ok(Ok(conn)) => {
                    self.created_total.fetch_add(1, Ordering::Relaxed);
                    return Ok(conn);
                },
                Ok(Err(err)) => {
                    last_error = err.to_string();
                },
                Err(_) => {
                    last_error = "connect timed out".to_string();
                },
            }
            self.errors_total.fetch_add(1, Ordering::Relaxed);
            if attempt + 1 < max_attempts {
                sleep(Duration::from_secs(1u64 << attempt)).await;
            }
        }
        Err(PoolError::ConnectFailed {
            attempts: max_attempts,
            message: last_error,
        }
        .into())
    }

    fn release(&self, conn: Option<C>) {
        let mut state = self.state.lock();
        state.active_count = state.active_count.saturating_sub(1);
        if let Some(conn) = conn {
            if state.idle.len() < self.config.max_size {
                state.idle.push_back(conn);
            }
        }
        drop(state);
        self.semaphore.add_permits(1);
    }

    /// Current pool metrics (active/idle connection counts).
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.state.lock();
        PoolMetrics {
            active: state.active_count,
            idle: state.idle.len(),
            total: state.active_count + state.idle.len(),
            created_total: self.created_total.load(Ordering::Relaxed),
            reused_total: self.reused_total.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }

    /// Mark the pool closed. Outstanding leases still release normally but
    /// new `lease()` calls fail immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// RAII lease handle. On drop, the connection is reset (transaction rolled
/// back) and returned to the pool — or discarded, if the reset itself fails,
/// so a corrupted connection never re-enters circulation.
pub struct PooledConnection<'a, C: PoolableConnection, F: ConnectionFactory<C>> {
    pool: &'a ConnectionPool<C, F>,
    conn: Option<C>,
}

impl<C: PoolableConnection, F: ConnectionFactory<C>> PooledConnection<'_, C, F> {
    /// Borrow the underlying connection.
    #[must_use]
    pub fn get(&self) -> &C {
        self.conn.as_ref().expect("connection present for lease lifetime")
    }
}

impl<C: PoolableConnection, F: ConnectionFactory<C>> Drop for PooledConnection<'_, C, F> {
    fn drop(&mut self) {
        let conn = self.conn.take();
        self.pool.release(conn);
    }
}
