//! In-process backend.
//!
//! `MemoryBackend` models the parts of a pooled relational database the
//! router depends on: a bounded pool with an acquire timeout, transactions
//! that stage statements until commit, and namespaces that must exist before
//! they can be bound. Statements are not interpreted; each namespace keeps a
//! journal of the statements committed to it.
//!
//! Faults and latency can be injected, which is what the integration tests
//! use to exercise deadlines, partial fan-out failures and pool pressure.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::core::{BackendKind, BindScope, NamespaceBackend, NamespaceSession, PoolStatus};
use crate::error::{BackendError, NamespaceError, StorageError, StorageResult};
use crate::schema::Namespace;

const BACKEND_NAME: &str = "memory";

/// Counters describing what sessions did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Connections handed out.
    pub acquisitions: u64,
    /// Transactions started.
    pub begins: u64,
    /// Transactions committed.
    pub commits: u64,
    /// Transactions rolled back explicitly.
    pub rollbacks: u64,
    /// Sessions dropped with a transaction still open.
    pub abandoned: u64,
    /// Abandoned statements interrupted before a rollback.
    pub interrupted: u64,
    /// The last per-statement limit a transaction asked for.
    pub statement_timeout: Option<Duration>,
}

#[derive(Debug)]
struct Fault {
    namespace: String,
    needle: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: BTreeMap<String, Vec<String>>,
    faults: Vec<Fault>,
    stats: MemoryStats,
}

impl MemoryState {
    fn fault_for(&self, namespace: &str, sql: &str) -> Option<&Fault> {
        self.faults
            .iter()
            .find(|f| f.namespace == namespace && sql.contains(&f.needle))
    }
}

/// In-process implementation of [`NamespaceBackend`].
///
/// # Example
///
/// ```
/// use shiftbook_persistence::backends::memory::MemoryBackend;
/// use shiftbook_persistence::config::PoolConfig;
///
/// let backend = MemoryBackend::new(PoolConfig::default())
///     .with_namespaces(["public", "company_a"]);
/// assert_eq!(backend.namespaces(), vec!["company_a", "public"]);
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    pool: Arc<Semaphore>,
    config: PoolConfig,
    latency: Duration,
    state: Arc<RwLock<MemoryState>>,
}

impl Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("config", &self.config)
            .field("latency", &self.latency)
            .field("namespaces", &self.state.read().namespaces.len())
            .finish_non_exhaustive()
    }
}

impl MemoryBackend {
    /// Creates a backend with the given pool bounds and no namespaces.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            pool: Arc::new(Semaphore::new(config.max_connections)),
            config,
            latency: Duration::ZERO,
            state: Arc::new(RwLock::new(MemoryState::default())),
        }
    }

    /// Creates a backend whose pool holds exactly one connection.
    pub fn single_connection() -> Self {
        Self::new(PoolConfig::single_connection())
    }

    /// Every statement takes `latency` to complete.
    pub fn with_statement_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Creates the given namespaces.
    pub fn with_namespaces<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.create_namespace(name);
        }
        self
    }

    /// Creates a namespace if it does not exist.
    pub fn create_namespace(&self, name: impl Into<String>) {
        self.state.write().namespaces.entry(name.into()).or_default();
    }

    /// Drops a namespace and its journal.
    pub fn drop_namespace(&self, name: &str) {
        self.state.write().namespaces.remove(name);
    }

    /// All namespace names, sorted.
    pub fn namespaces(&self) -> Vec<String> {
        self.state.read().namespaces.keys().cloned().collect()
    }

    /// Statements committed to `namespace`, in commit order.
    pub fn committed(&self, namespace: &str) -> Vec<String> {
        self.state
            .read()
            .namespaces
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    /// Statements in `namespace` containing `needle` fail from now on.
    pub fn fail_statements_matching(&self, namespace: impl Into<String>, needle: impl Into<String>) {
        self.state.write().faults.push(Fault {
            namespace: namespace.into(),
            needle: needle.into(),
        });
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        self.state.write().faults.clear();
    }

    /// Returns the session counters.
    pub fn stats(&self) -> MemoryStats {
        self.state.read().stats
    }
}

#[async_trait]
impl NamespaceBackend for MemoryBackend {
    type Session = MemorySession;

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn max_connections(&self) -> usize {
        self.config.max_connections
    }

    fn status(&self) -> PoolStatus {
        let available = self.pool.available_permits();
        PoolStatus {
            max_size: self.config.max_connections,
            size: self.config.max_connections,
            available,
            waiting: 0,
        }
    }

    async fn acquire(&self) -> Result<MemorySession, BackendError> {
        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            Arc::clone(&self.pool).acquire_owned(),
        )
        .await
        .map_err(|_| BackendError::AcquireFailed {
            backend_name: BACKEND_NAME.to_string(),
            message: format!(
                "no connection available within {}",
                humantime::format_duration(self.config.acquire_timeout)
            ),
        })?
        .map_err(|_| BackendError::Unavailable {
            backend_name: BACKEND_NAME.to_string(),
            message: "pool is closed".to_string(),
        })?;

        self.state.write().stats.acquisitions += 1;

        Ok(MemorySession {
            state: Arc::clone(&self.state),
            _permit: permit,
            latency: self.latency,
            in_transaction: false,
            in_flight: false,
            statement_timeout: None,
            tx_namespace: None,
            session_namespace: None,
            staged: Vec::new(),
        })
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        if self.pool.is_closed() {
            return Err(BackendError::Unavailable {
                backend_name: BACKEND_NAME.to_string(),
                message: "pool is closed".to_string(),
            });
        }
        Ok(())
    }
}

/// One connection of a [`MemoryBackend`].
pub struct MemorySession {
    state: Arc<RwLock<MemoryState>>,
    _permit: OwnedSemaphorePermit,
    latency: Duration,
    in_transaction: bool,
    in_flight: bool,
    statement_timeout: Option<Duration>,
    tx_namespace: Option<String>,
    session_namespace: Option<String>,
    staged: Vec<(String, String)>,
}

impl Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("in_transaction", &self.in_transaction)
            .field("namespace", &self.active_namespace())
            .field("staged", &self.staged.len())
            .finish()
    }
}

impl MemorySession {
    fn active_namespace(&self) -> Option<&str> {
        self.tx_namespace
            .as_deref()
            .or(self.session_namespace.as_deref())
    }

    fn end_transaction(&mut self) {
        self.in_transaction = false;
        self.statement_timeout = None;
        self.tx_namespace = None;
        self.staged.clear();
    }

    async fn run(&mut self, sql: &str) -> Result<(), BackendError> {
        if !self.latency.is_zero() {
            // Stays set if the caller drops this future mid-statement.
            self.in_flight = true;
            match self.statement_timeout {
                Some(limit) if limit < self.latency => {
                    tokio::time::sleep(limit).await;
                    self.in_flight = false;
                    return Err(BackendError::Query {
                        backend_name: BACKEND_NAME.to_string(),
                        message: "canceling statement due to statement timeout".to_string(),
                        code: Some("57014".to_string()),
                        source: None,
                    });
                }
                _ => tokio::time::sleep(self.latency).await,
            }
            self.in_flight = false;
        }

        let namespace = self
            .active_namespace()
            .map(str::to_string)
            .ok_or_else(|| query_error("no schema has been selected"))?;

        let mut state = self.state.write();
        if !state.namespaces.contains_key(&namespace) {
            return Err(query_error(&format!("schema \"{}\" does not exist", namespace)));
        }
        if let Some(fault) = state.fault_for(&namespace, sql) {
            return Err(query_error(&format!(
                "statement rejected (matched '{}')",
                fault.needle
            )));
        }

        if self.in_transaction {
            self.staged.push((namespace, sql.to_string()));
        } else if let Some(journal) = state.namespaces.get_mut(&namespace) {
            journal.push(sql.to_string());
        }
        Ok(())
    }
}

fn query_error(message: &str) -> BackendError {
    BackendError::Query {
        backend_name: BACKEND_NAME.to_string(),
        message: message.to_string(),
        code: None,
        source: None,
    }
}

#[async_trait]
impl NamespaceSession for MemorySession {
    async fn begin(&mut self) -> Result<(), BackendError> {
        if self.in_transaction {
            return Err(query_error("a transaction is already in progress"));
        }
        self.in_transaction = true;
        self.state.write().stats.begins += 1;
        Ok(())
    }

    async fn bind_namespace(&mut self, namespace: &Namespace, scope: BindScope) -> StorageResult<()> {
        if !self.state.read().namespaces.contains_key(namespace.name()) {
            return Err(StorageError::Namespace(NamespaceError::Unavailable {
                namespace: namespace.name().to_string(),
                message: "schema does not exist".to_string(),
            }));
        }

        match scope {
            BindScope::Transaction => {
                if !self.in_transaction {
                    return Err(StorageError::in_namespace(
                        namespace.name(),
                        query_error("transaction-scoped binding outside a transaction"),
                    ));
                }
                self.tx_namespace = Some(namespace.name().to_string());
            }
            BindScope::Session => {
                self.session_namespace = Some(namespace.name().to_string());
            }
        }
        Ok(())
    }

    async fn limit_statement_time(&mut self, timeout: Duration) -> Result<(), BackendError> {
        if !self.in_transaction {
            return Err(query_error("statement limits need a transaction"));
        }
        self.statement_timeout = Some(timeout);
        self.state.write().stats.statement_timeout = Some(timeout);
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.run(sql).await?;
        Ok(1)
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<(), BackendError> {
        self.run(sql).await
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        if !self.in_transaction {
            return Err(query_error("there is no transaction in progress"));
        }
        let staged = std::mem::take(&mut self.staged);
        {
            let mut state = self.state.write();
            for (namespace, sql) in staged {
                if let Some(journal) = state.namespaces.get_mut(&namespace) {
                    journal.push(sql);
                }
            }
            state.stats.commits += 1;
        }
        self.end_transaction();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        if self.in_flight {
            self.in_flight = false;
            self.state.write().stats.interrupted += 1;
        }
        if self.in_transaction {
            self.state.write().stats.rollbacks += 1;
        }
        self.end_transaction();
        Ok(())
    }

    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .state
            .read()
            .namespaces
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn ensure_namespace(&mut self, namespace: &Namespace) -> Result<(), BackendError> {
        self.state
            .write()
            .namespaces
            .entry(namespace.name().to_string())
            .or_default();
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.in_transaction {
            self.state.write().stats.abandoned += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaResolver;
    use crate::tenant::TenantId;

    fn tenant(resolver: &SchemaResolver, id: &str) -> Namespace {
        resolver.resolve(&TenantId::new(id)).unwrap()
    }

    #[tokio::test]
    async fn test_commit_publishes_statements() {
        let resolver = SchemaResolver::default();
        let backend = MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_a"]);

        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        session
            .bind_namespace(&tenant(&resolver, "a"), BindScope::Transaction)
            .await
            .unwrap();
        session.execute("INSERT INTO orders VALUES (1)").await.unwrap();
        assert!(backend.committed("company_a").is_empty());

        session.commit().await.unwrap();
        assert_eq!(backend.committed("company_a"), vec!["INSERT INTO orders VALUES (1)"]);
        assert!(!session.in_transaction());
    }

    #[tokio::test]
    async fn test_rollback_discards_statements() {
        let resolver = SchemaResolver::default();
        let backend = MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_a"]);

        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        session
            .bind_namespace(&tenant(&resolver, "a"), BindScope::Transaction)
            .await
            .unwrap();
        session.execute("DELETE FROM orders").await.unwrap();
        session.rollback().await.unwrap();

        assert!(backend.committed("company_a").is_empty());
        assert_eq!(backend.stats().rollbacks, 1);
    }

    #[tokio::test]
    async fn test_binding_missing_namespace_fails() {
        let resolver = SchemaResolver::default();
        let backend = MemoryBackend::new(PoolConfig::default());

        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        let err = session
            .bind_namespace(&tenant(&resolver, "ghost"), BindScope::Transaction)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Namespace(_)));
    }

    #[tokio::test]
    async fn test_transaction_binding_is_cleared_on_commit() {
        let resolver = SchemaResolver::default();
        let backend = MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_a"]);

        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        session
            .bind_namespace(&tenant(&resolver, "a"), BindScope::Transaction)
            .await
            .unwrap();
        session.commit().await.unwrap();

        assert!(session.execute("SELECT 1").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let resolver = SchemaResolver::default();
        let backend = MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_b"]);
        backend.fail_statements_matching("company_b", "ADD COLUMN");

        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        session
            .bind_namespace(&tenant(&resolver, "b"), BindScope::Transaction)
            .await
            .unwrap();
        let err = session
            .batch_execute("ALTER TABLE orders ADD COLUMN note text")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ADD COLUMN"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out_when_exhausted() {
        let backend = MemoryBackend::new(
            PoolConfig::single_connection().with_acquire_timeout(Duration::from_millis(100)),
        );

        let held = backend.acquire().await.unwrap();
        let err = backend.acquire().await.unwrap_err();
        assert!(matches!(err, BackendError::AcquireFailed { .. }));
        assert_eq!(backend.status().available, 0);

        drop(held);
        assert_eq!(backend.status().available, 1);
        assert!(backend.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_open_transaction_is_counted() {
        let backend = MemoryBackend::new(PoolConfig::default());
        let mut session = backend.acquire().await.unwrap();
        session.begin().await.unwrap();
        drop(session);
        assert_eq!(backend.stats().abandoned, 1);
    }

    #[tokio::test]
    async fn test_list_namespaces_by_prefix() {
        let backend = MemoryBackend::new(PoolConfig::default())
            .with_namespaces(["public", "unassigned", "company_b", "company_a"]);
        let mut session = backend.acquire().await.unwrap();
        let names = session.list_namespaces("company_").await.unwrap();
        assert_eq!(names, vec!["company_a", "company_b"]);
    }
}
