//! Backend abstraction for namespace-aware database drivers.
//!
//! A [`NamespaceBackend`] owns a bounded pool of connections and hands out
//! [`NamespaceSession`]s. A session is one physical connection that can run a
//! transaction and make one namespace active for its statements.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{BackendError, StorageResult};
use crate::schema::Namespace;

/// Identifies the type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// PostgreSQL database.
    Postgres,
    /// In-process backend used for tests and local tooling.
    Memory,
    /// Custom or unknown backend.
    Custom(&'static str),
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Postgres => write!(f, "postgres"),
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// How long a namespace binding lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindScope {
    /// Until the current transaction commits or rolls back.
    Transaction,
    /// Until the connection is reset. Only valid on a connection that is
    /// never shared between units of work.
    Session,
}

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PoolStatus {
    /// Maximum number of connections.
    pub max_size: usize,
    /// Connections currently open.
    pub size: usize,
    /// Open connections not handed out.
    pub available: usize,
    /// Callers waiting for a connection.
    pub waiting: usize,
}

/// One pooled connection.
///
/// Dropping a session returns it to its pool. Implementations must make sure
/// a session dropped with an open transaction is never handed out again in
/// that state.
#[async_trait]
pub trait NamespaceSession: Send + 'static {
    /// Starts a transaction.
    async fn begin(&mut self) -> Result<(), BackendError>;

    /// Makes `namespace` the only namespace unqualified statements resolve in.
    ///
    /// Fails with `NamespaceUnavailable` if the namespace does not exist.
    async fn bind_namespace(&mut self, namespace: &Namespace, scope: BindScope) -> StorageResult<()>;

    /// Makes the database abort any statement of the current transaction
    /// that runs longer than `timeout`.
    async fn limit_statement_time(&mut self, timeout: Duration) -> Result<(), BackendError>;

    /// Runs one statement and returns the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError>;

    /// Runs a script of one or more statements verbatim.
    async fn batch_execute(&mut self, sql: &str) -> Result<(), BackendError>;

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<(), BackendError>;

    /// Rolls back the current transaction.
    ///
    /// If a statement was abandoned while still running, it is interrupted on
    /// the server first, so the rollback does not wait for it to finish.
    async fn rollback(&mut self) -> Result<(), BackendError>;

    /// Lists namespace names starting with `prefix`.
    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Creates the namespace if it does not exist.
    async fn ensure_namespace(&mut self, namespace: &Namespace) -> Result<(), BackendError>;

    /// Returns `true` between `begin` and `commit`/`rollback`.
    fn in_transaction(&self) -> bool;
}

/// A database backend owning a bounded connection pool.
///
/// # Example
///
/// ```ignore
/// use shiftbook_persistence::core::NamespaceBackend;
///
/// let status = backend.status();
/// println!("{} of {} connections free", status.available, status.max_size);
/// ```
#[async_trait]
pub trait NamespaceBackend: Send + Sync + Debug + 'static {
    /// The pooled connection type.
    type Session: NamespaceSession;

    /// Returns the kind of backend.
    fn kind(&self) -> BackendKind;

    /// Returns a human-readable name for this backend.
    fn name(&self) -> &'static str;

    /// Maximum number of concurrently open connections.
    fn max_connections(&self) -> usize;

    /// Returns current pool occupancy.
    fn status(&self) -> PoolStatus;

    /// Acquires a connection, waiting up to the configured acquire timeout.
    async fn acquire(&self) -> Result<Self::Session, BackendError>;

    /// Checks if the backend is healthy and accepting connections.
    async fn health_check(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_display() {
        assert_eq!(BackendKind::Postgres.to_string(), "postgres");
        assert_eq!(BackendKind::Memory.to_string(), "memory");
        assert_eq!(BackendKind::Custom("custom-db").to_string(), "custom-db");
    }

    #[test]
    fn test_pool_status_serializes() {
        let status = PoolStatus {
            max_size: 5,
            size: 2,
            available: 1,
            waiting: 0,
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["max_size"], 5);
        assert_eq!(json["available"], 1);
    }
}
