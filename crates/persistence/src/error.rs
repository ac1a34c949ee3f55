//! Error types for the persistence layer.
//!
//! Errors are organised as a hierarchy: tenant resolution, validation,
//! transaction lifecycle, backend (pool and driver), namespace binding and
//! migration fan-out errors are all folded into [`StorageError`].
//!
//! Every error can be classified with [`StorageError::kind`], which maps it
//! onto the small taxonomy callers branch on, and rendered for request
//! surfaces with [`StorageError::public_message`], which never contains
//! namespace names.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::tenant::TenantId;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Tenant identification errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Input and configuration validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Transaction lifecycle errors
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Pool and connection errors that happen before a namespace is bound
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Namespace binding errors
    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    /// Fan-out migration errors
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// No connection could be checked out and put into a transaction for a namespace.
    #[error("could not open a transaction in schema {namespace}: {source}")]
    Acquire {
        namespace: String,
        #[source]
        source: BackendError,
    },

    /// A driver error raised while a namespace was bound.
    #[error("database error in schema {namespace}: {source}")]
    Database {
        namespace: String,
        #[source]
        source: BackendError,
    },
}

/// Errors related to tenant identification.
#[derive(Error, Debug)]
pub enum TenantError {
    /// The tenant identifier cannot be mapped to a namespace.
    #[error("invalid tenant '{tenant_id}': {reason}")]
    InvalidTenant { tenant_id: TenantId, reason: String },

    /// The unit of work carries no tenant at all.
    #[error("invalid tenant: no tenant context attached to the request")]
    MissingContext,
}

/// Errors related to input and configuration validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// A migration script with no statements.
    #[error("migration script '{script}' is empty")]
    EmptyScript { script: String },

    /// The migration script could not be located.
    #[error("migration script not found: {}", path.display())]
    ScriptNotFound { path: PathBuf },

    /// The migration script exists but could not be read.
    #[error("migration script {} could not be read: {source}", path.display())]
    ScriptUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The resume point does not name a tenant namespace.
    #[error("resume point '{namespace}' is not a tenant schema")]
    UnknownResumePoint { namespace: String },

    /// A session-level namespace switch needs exclusive use of one connection.
    #[error("direct schema switching requires a single-connection pool, got max_connections = {max_connections}")]
    SharedSessionRequiresSingleConnection { max_connections: usize },

    /// A configuration value is malformed.
    #[error("invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },
}

/// Errors related to the lifecycle of a transaction handle.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// The deadline expired before the work finished; the transaction was rolled back.
    #[error("deadline of {timeout_ms}ms exceeded in schema {namespace}")]
    DeadlineExceeded { namespace: String, timeout_ms: u64 },

    /// The scope was cancelled before the work finished; the transaction was rolled back.
    #[error("transaction in schema {namespace} was cancelled")]
    Cancelled { namespace: String },

    /// The transaction was already rolled back.
    #[error("transaction in schema {namespace} rolled back: {reason}")]
    RolledBack { namespace: String, reason: String },

    /// The transaction already reached a terminal state.
    #[error("transaction in schema {namespace} is no longer open")]
    InvalidTransaction { namespace: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No connection could be obtained from the pool.
    #[error("failed to acquire a connection from {backend_name}: {message}")]
    AcquireFailed {
        backend_name: String,
        message: String,
    },

    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// The backend is currently unavailable.
    #[error("backend unavailable: {backend_name}: {message}")]
    Unavailable {
        backend_name: String,
        message: String,
    },

    /// A statement was rejected by the database.
    #[error("query failed in {backend_name}: {message}")]
    Query {
        backend_name: String,
        message: String,
        code: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Errors related to binding a session to a namespace.
#[derive(Error, Debug)]
pub enum NamespaceError {
    /// The namespace does not exist or cannot be made active.
    #[error("schema {namespace} unavailable: {message}")]
    Unavailable { namespace: String, message: String },
}

/// Errors raised by the migration fan-out.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// The script failed in one tenant namespace; earlier namespaces stay committed.
    #[error(
        "migration applied to {applied} of {total} schemas; failed at schema {namespace}: {}",
        source.cause()
    )]
    Failed {
        script: String,
        applied: usize,
        total: usize,
        namespace: String,
        position: usize,
        #[source]
        source: Box<StorageError>,
    },
}

/// The error taxonomy callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The tenant identifier is missing, empty or malformed.
    InvalidTenant,
    /// The pool did not hand out a connection.
    AcquireFailed,
    /// The resolved namespace could not be made active.
    NamespaceUnavailable,
    /// The transaction deadline expired.
    DeadlineExceeded,
    /// The transaction scope was cancelled.
    Cancelled,
    /// Caller input or configuration was rejected.
    ValidationError,
    /// The database rejected a statement.
    Database,
    /// Anything else.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidTenant => "InvalidTenant",
            ErrorKind::AcquireFailed => "AcquireFailed",
            ErrorKind::NamespaceUnavailable => "NamespaceUnavailable",
            ErrorKind::DeadlineExceeded => "DeadlineExceeded",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::Database => "Database",
            ErrorKind::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

impl StorageError {
    /// Classifies the error. Fan-out failures report the kind of their cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Tenant(_) => ErrorKind::InvalidTenant,
            StorageError::Validation(_) => ErrorKind::ValidationError,
            StorageError::Transaction(TransactionError::DeadlineExceeded { .. }) => {
                ErrorKind::DeadlineExceeded
            }
            StorageError::Transaction(TransactionError::Cancelled { .. }) => ErrorKind::Cancelled,
            StorageError::Transaction(_) => ErrorKind::Internal,
            StorageError::Backend(BackendError::AcquireFailed { .. }) => ErrorKind::AcquireFailed,
            StorageError::Backend(BackendError::Query { .. }) => ErrorKind::Database,
            StorageError::Backend(_) => ErrorKind::Internal,
            StorageError::Namespace(_) => ErrorKind::NamespaceUnavailable,
            StorageError::Migration(MigrationError::Failed { source, .. }) => source.kind(),
            StorageError::Acquire { .. } => ErrorKind::AcquireFailed,
            StorageError::Database { .. } => ErrorKind::Database,
        }
    }

    /// The namespace the error is attributed to, if any.
    pub fn namespace(&self) -> Option<&str> {
        match self {
            StorageError::Transaction(
                TransactionError::DeadlineExceeded { namespace, .. }
                | TransactionError::Cancelled { namespace }
                | TransactionError::RolledBack { namespace, .. }
                | TransactionError::InvalidTransaction { namespace },
            ) => Some(namespace),
            StorageError::Namespace(NamespaceError::Unavailable { namespace, .. }) => {
                Some(namespace)
            }
            StorageError::Migration(MigrationError::Failed { namespace, .. }) => Some(namespace),
            StorageError::Acquire { namespace, .. } | StorageError::Database { namespace, .. } => {
                Some(namespace)
            }
            _ => None,
        }
    }

    /// Message safe to return to request callers.
    ///
    /// Namespace names and driver details are never included; the full
    /// error belongs in the logs.
    pub fn public_message(&self) -> &'static str {
        match self.kind() {
            ErrorKind::InvalidTenant => "invalid tenant",
            ErrorKind::ValidationError => "invalid request",
            ErrorKind::DeadlineExceeded => "request deadline exceeded",
            ErrorKind::Cancelled => "request cancelled",
            _ => "internal server error",
        }
    }

    /// The error message without the namespace it is attributed to.
    fn cause(&self) -> String {
        match self {
            StorageError::Acquire { source, .. } | StorageError::Database { source, .. } => {
                source.to_string()
            }
            StorageError::Namespace(NamespaceError::Unavailable { message, .. }) => {
                format!("schema unavailable: {}", message)
            }
            StorageError::Transaction(TransactionError::DeadlineExceeded { timeout_ms, .. }) => {
                format!("deadline of {}ms exceeded", timeout_ms)
            }
            StorageError::Transaction(TransactionError::Cancelled { .. }) => "cancelled".to_string(),
            StorageError::Transaction(TransactionError::RolledBack { reason, .. }) => {
                format!("rolled back: {}", reason)
            }
            StorageError::Transaction(TransactionError::InvalidTransaction { .. }) => {
                "transaction is no longer open".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Attributes a failed checkout or BEGIN to the namespace it was meant for.
    pub(crate) fn acquiring(namespace: &str, source: BackendError) -> Self {
        StorageError::Acquire {
            namespace: namespace.to_string(),
            source,
        }
    }

    /// Attributes a backend error to the namespace it was raised in.
    pub(crate) fn in_namespace(namespace: &str, source: BackendError) -> Self {
        StorageError::Database {
            namespace: namespace.to_string(),
            source,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Internal {
            backend_name: "unknown".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for BackendError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = err.code().map(|state| state.code().to_string());
        let message = match err.as_db_error() {
            Some(db) => db.message().to_string(),
            None => err.to_string(),
        };
        BackendError::Query {
            backend_name: "postgres".to_string(),
            message,
            code,
            source: Some(Box::new(err)),
        }
    }
}
