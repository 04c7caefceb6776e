//! Backend Manager.
//!
//! Owns adapter instances for the lifetime of the process, drives parallel
//! startup with per-backend timeouts, and exposes a uniform
//! `get_<kind>_backend()` surface that hides strict-vs-lenient failure
//! policy from the rest of the core. Deferred factory thunks, accumulated
//! backend errors, and a point-in-time status snapshot are realized with
//! `DashMap` + `tokio::task::JoinSet` + `Semaphore` for bounded concurrent
//! startup.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use polyglot_error::{BackendError, PersistenceError, Result};
use tokio::sync::Semaphore;

use crate::backend::{AdapterHandle, BackendKind, DocumentAdapter, FileAdapter, GraphAdapter, RelationalAdapter, VectorAdapter};

/// Status machine for one configured backend: `configured → connecting →
/// healthy | error → stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Configured,
    Connecting,
    Healthy,
    Error,
    Stopped,
}

/// A thunk that builds the adapter for one backend. Held instead of an
/// already-constructed adapter so construction can be deferred past manager
/// init, avoiding any blocking I/O in the constructor, and still be
/// invoked under a per-backend timeout from the startup executor.
pub type BackendFactory = Box<dyn Fn() -> AdapterHandle + Send + Sync>;

struct BackendEntry {
    factory: Mutex<Option<BackendFactory>>,
    adapter: Mutex<Option<AdapterHandle>>,
    status: Mutex<BackendStatus>,
}

/// Whether a missing or unhealthy backend raises (`Strict`) or returns a
/// recorded error and lets the caller proceed without it (`Lenient`), so
/// one unreachable backend never prevents the others from starting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Strict,
    Lenient,
}

/// A point-in-time dump of manager state, the Rust realization of the
/// manager's internal state, useful for building an operational dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ManagerStatusSnapshot {
    pub statuses: Vec<(BackendKind, String)>,
    pub errors: Vec<String>,
}

/// Owns one adapter per configured [`BackendKind`] and arbitrates access to
/// it through a strict-or-lenient policy.
pub struct BackendManager {
    entries: DashMap<BackendKind, BackendEntry>,
    errors: Mutex<Vec<String>>,
    policy: FailurePolicy,
}

impl BackendManager {
    /// Construct an empty manager. Backends are registered with
    /// [`Self::register`] before [`Self::start_all_backends`] is called;
    /// registration never connects.
    #[must_use]
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            errors: Mutex::new(Vec::new()),
            policy,
        }
    }

    /// Register a deferred factory for `kind`. Overwrites any prior
    /// registration for the same kind (the manager holds at most one
    /// adapter per kind).
    pub fn register(&self, kind: BackendKind, factory: BackendFactory) {
        self.entries.insert(
            kind,
            BackendEntry {
                factory: Mutex::new(Some(factory)),
                adapter: Mutex::new(None),
                status: Mutex::new(BackendStatus::Configured),
            },
        );
    }

    /// Kinds currently registered, regardless of health.
    #[must_use]
    pub fn registered_kinds(&self) -> Vec<BackendKind> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    /// Start every registered backend (or just `subset`, if given), each
    /// under its own `per_backend_timeout`, bounded to `min(8, n)` concurrent
    /// connect attempts. Never raises for per-backend failures — only a
    /// bug in the executor itself would propagate, which `JoinSet` turns
    /// into a logged skip rather than a panic across tasks.
    pub async fn start_all_backends(
        &self,
        subset: Option<&[BackendKind]>,
        per_backend_timeout: Duration,
    ) -> std::collections::HashMap<BackendKind, bool> {
        let targets: Vec<BackendKind> = match subset {
            Some(kinds) => kinds.to_vec(),
            None => self.registered_kinds(),
        };
        let concurrency = targets.len().clamp(1, 8);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = tokio::task::JoinSet::new();

        for kind in targets {
            let Some(handle) = self.take_or_build_adapter(kind) else {
                continue;
            };
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let outcome = tokio::time::timeout(per_backend_timeout, handle.as_backend_adapter().connect()).await;
                (kind, handle, outcome)
            });
        }

        let mut results = std::collections::HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((kind, handle, outcome)) = joined else {
                tracing::error!("backend startup task panicked");
                continue;
            };
            match outcome {
                Ok(Ok(())) => {
                    self.mark_healthy(kind, handle);
                    results.insert(kind, true);
                },
                Ok(Err(err)) => {
                    self.record_error(kind, err.to_string());
                    results.insert(kind, false);
                },
                Err(_) => {
                    self.record_error(kind, "connect timed out".to_string());
                    results.insert(kind, false);
                },
            }
        }
        results
    }

    fn take_or_build_adapter(&self, kind: BackendKind) -> Option<AdapterHandle> {
        let entry = self.entries.get(&kind)?;
        *entry.status.lock() = BackendStatus::Connecting;
        if let Some(handle) = entry.adapter.lock().clone() {
            return Some(handle);
        }
        let factory = entry.factory.lock().take()?;
        Some(factory())
    }

    fn mark_healthy(&self, kind: BackendKind, handle: AdapterHandle) {
        if let Some(entry) = self.entries.get(&kind) {
            *entry.adapter.lock() = Some(handle);
            *entry.status.lock() = BackendStatus::Healthy;
        }
    }

    fn record_error(&self, kind: BackendKind, message: String) {
        if let Some(entry) = self.entries.get(&kind) {
            *entry.status.lock() = BackendStatus::Error;
        }
        self.errors.lock().push(format!("{kind}: {message}"));
        tracing::warn!(backend = %kind, error = %message, "backend start failed");
    }

    fn healthy_handle(&self, kind: BackendKind) -> Option<AdapterHandle> {
        self.entries.get(&kind).and_then(|entry| {
            if *entry.status.lock() == BackendStatus::Healthy {
                entry.adapter.lock().clone()
            } else {
                None
            }
        })
    }

    fn unavailable_or_recorded(&self, kind: BackendKind) -> Result<Option<AdapterHandle>> {
        match self.policy {
            FailurePolicy::Lenient => {
                self.errors.lock().push(format!("{kind}: backend unavailable"));
                Ok(None)
            },
            FailurePolicy::Strict => Err(PersistenceError::from(BackendError::Unavailable { kind: kind.to_string() })),
        }
    }

    /// Fetch the adapter handle for `kind` if it is currently healthy.
    ///
    /// # Errors
    ///
    /// In [`FailurePolicy::Strict`] mode, returns
    /// `BackendError::Unavailable` when the backend is missing or
    /// unhealthy. In [`FailurePolicy::Lenient`] mode, the same condition
    /// returns `Ok(None)` and records the reason in the manager's error
    /// list instead.
    pub fn get_backend(&self, kind: BackendKind) -> Result<Option<AdapterHandle>> {
        match self.healthy_handle(kind) {
            Some(handle) => Ok(Some(handle)),
            None => self.unavailable_or_recorded(kind),
        }
    }

    /// Typed accessor for the relational backend, if healthy.
    ///
    /// # Errors
    ///
    /// See [`Self::get_backend`].
    pub fn get_relational_backend(&self) -> Result<Option<Arc<dyn RelationalAdapter>>> {
        match self.healthy_handle(BackendKind::Relational).and_then(|h| h.as_relational()) {
            Some(a) => Ok(Some(a)),
            None => self.unavailable_or_recorded(BackendKind::Relational).map(|_| None),
        }
    }

    /// Typed accessor for the document backend, if healthy.
    ///
    /// # Errors
    ///
    /// See [`Self::get_backend`].
    pub fn get_document_backend(&self) -> Result<Option<Arc<dyn DocumentAdapter>>> {
        match self.healthy_handle(BackendKind::Document).and_then(|h| h.as_document()) {
            Some(a) => Ok(Some(a)),
            None => self.unavailable_or_recorded(BackendKind::Document).map(|_| None),
        }
    }

    /// Typed accessor for the vector backend, if healthy.
    ///
    /// # Errors
    ///
    /// See [`Self::get_backend`].
    pub fn get_vector_backend(&self) -> Result<Option<Arc<dyn VectorAdapter>>> {
        match self.healthy_handle(BackendKind::Vector).and_then(|h| h.as_vector()) {
            Some(a) => Ok(Some(a)),
            None => self.unavailable_or_recorded(BackendKind::Vector).map(|_| None),
        }
    }

    /// Typed accessor for the graph backend, if healthy.
    ///
    /// # Errors
    ///
    /// See [`Self::get_backend`].
    pub fn get_graph_backend(&self) -> Result<Option<Arc<dyn GraphAdapter>>> {
        match self.healthy_handle(BackendKind::Graph).and_then(|h| h.as_graph()) {
            Some(a) => Ok(Some(a)),
            None => self.unavailable_or_recorded(BackendKind::Graph).map(|_| None),
        }
    }

    /// Typed accessor for the file backend, if healthy.
    ///
    /// # Errors
    ///
    /// See [`Self::get_backend`].
    pub fn get_file_backend(&self) -> Result<Option<Arc<dyn FileAdapter>>> {
        match self.healthy_handle(BackendKind::File).and_then(|h| h.as_file()) {
            Some(a) => Ok(Some(a)),
            None => self.unavailable_or_recorded(BackendKind::File).map(|_| None),
        }
    }

    /// Errors accumulated since construction or the last
    /// [`Self::clear_backend_errors`] call.
    #[must_use]
    pub fn get_backend_errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    /// Clear the accumulated error list.
    pub fn clear_backend_errors(&self) {
        self.errors.lock().clear();
    }

    /// A serializable snapshot of every registered backend's status plus
    /// outstanding errors, for callers building an operational dashboard
    /// (the core itself exposes no HTTP/gRPC surface of its own).
    #[must_use]
    pub fn status_snapshot(&self) -> ManagerStatusSnapshot {
        let statuses = self
            .entries
            .iter()
            .map(|e| {
                let status = *e.status.lock();
                (*e.key(), format!("{status:?}"))
            })
            .collect();
        ManagerStatusSnapshot {
            statuses,
            errors: self.errors.lock().clone(),
        }
    }

    /// Disconnect every adapter that was ever connected. Exceptions during
    /// disconnect are logged, never raised.
    pub async fn stop_all_backends(&self) {
        let handles: Vec<(BackendKind, AdapterHandle)> = self
            .entries
            .iter()
            .filter_map(|e| e.adapter.lock().clone().map(|a| (*e.key(), a)))
            .collect();
        for (kind, handle) in handles {
            if let Err(err) = handle.as_backend_adapter().disconnect().await {
                tracing::warn!(backend = %kind, error = %err, "disconnect failed");
            }
            if let Some(entry) = self.entries.get(&kind) {
                *entry.status.lock() = BackendStatus::Stopped;
                *entry.adapter.lock() = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendAdapter, BackendStats};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlakyAdapter {
        kind: BackendKind,
        should_fail: bool,
        connected: Arc<AtomicBool>,
    }

    #[async_trait]
    impl BackendAdapter for FlakyAdapter {
        async fn connect(&self) -> Result<()> {
            if self.should_fail {
                Err(BackendError::ConnectFailed {
                    kind: self.kind.to_string(),
                    message: "boom".into(),
                }
                .into())
            } else {
                self.connected.store(true, Ordering::SeqCst);
                Ok(())
            }
        }

        async fn disconnect(&self) -> Result<()> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_available(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn get_stats(&self) -> BackendStats {
            BackendStats::default()
        }
    }

    #[tokio::test]
    async fn healthy_backend_is_exposed_after_start() {
        let manager = BackendManager::new(FailurePolicy::Strict);
        let connected = Arc::new(AtomicBool::new(false));
        let connected_clone = connected.clone();
        manager.register(
            BackendKind::Relational,
            Box::new(move || {
                AdapterHandle::KeyValue(Arc::new(FlakyAdapter {
                    kind: BackendKind::Relational,
                    should_fail: false,
                    connected: connected_clone.clone(),
                }))
            }),
        );

        let results = manager.start_all_backends(None, Duration::from_secs(1)).await;
        assert_eq!(results.get(&BackendKind::Relational), Some(&true));
        assert!(manager.get_backend(BackendKind::Relational).unwrap().is_some());
    }

    #[tokio::test]
    async fn strict_mode_raises_for_missing_backend() {
        let manager = BackendManager::new(FailurePolicy::Strict);
        let err = manager.get_backend(BackendKind::Graph);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn lenient_mode_returns_none_and_records_error() {
        let manager = BackendManager::new(FailurePolicy::Lenient);
        let result = manager.get_backend(BackendKind::Graph).unwrap();
        assert!(result.is_none());
        assert!(!manager.get_backend_errors().is_empty());
    }

    #[tokio::test]
    async fn failed_start_is_recorded_and_backend_stays_unexposed() {
        let manager = BackendManager::new(FailurePolicy::Lenient);
        manager.register(
            BackendKind::Vector,
            Box::new(|| {
                AdapterHandle::KeyValue(Arc::new(FlakyAdapter {
                    kind: BackendKind::Vector,
                    should_fail: true,
                    connected: Arc::new(AtomicBool::new(false)),
                }))
            }),
        );

        let results = manager.start_all_backends(None, Duration::from_secs(1)).await;
        assert_eq!(results.get(&BackendKind::Vector), Some(&false));
        assert!(manager.get_backend(BackendKind::Vector).unwrap().is_none());
        assert!(manager.get_backend_errors().iter().any(|e| e.contains("Vector") || e.contains("vector")));
    }

    struct SlowAdapter {
        kind: BackendKind,
    }

    #[async_trait]
    impl BackendAdapter for SlowAdapter {
        async fn connect(&self) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }

        async fn disconnect(&self) -> Result<()> {
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }

        fn kind(&self) -> BackendKind {
            self.kind
        }
    }

    #[tokio::test]
    async fn zero_timeout_fails_every_backend() {
        let manager = BackendManager::new(FailurePolicy::Lenient);
        manager.register(
            BackendKind::Relational,
            Box::new(|| AdapterHandle::KeyValue(Arc::new(SlowAdapter { kind: BackendKind::Relational }))),
        );

        let results = manager.start_all_backends(None, Duration::from_secs(0)).await;
        assert_eq!(results.get(&BackendKind::Relational), Some(&false));
    }

    #[tokio::test]
    async fn stop_all_backends_clears_status() {
        let manager = BackendManager::new(FailurePolicy::Strict);
        manager.register(
            BackendKind::Relational,
            Box::new(|| {
                AdapterHandle::KeyValue(Arc::new(FlakyAdapter {
                    kind: BackendKind::Relational,
                    should_fail: false,
                    connected: Arc::new(AtomicBool::new(false)),
                }))
            }),
        );
        manager.start_all_backends(None, Duration::from_secs(1)).await;
        manager.stop_all_backends().await;
        assert!(manager.get_backend(BackendKind::Relational).is_err());
    }
}
