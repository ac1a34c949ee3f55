//! PostgreSQL backend implementation.
//!
//! Tenant namespaces are PostgreSQL schemas. A session binds one schema by
//! setting `search_path` to that schema alone, either for the current
//! transaction (`set_config(..., true)`) or for the rest of the session.
//!
//! # Features
//!
//! - Connection pooling with deadpool-postgres, bounded by [`PoolConfig`](crate::config::PoolConfig)
//! - Existence check in `pg_namespace` before binding, so a missing schema is
//!   reported as `NamespaceUnavailable` instead of failing later on the first table
//! - Connections dropped inside a transaction are detached instead of recycled
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shiftbook_persistence::backends::postgres::{PostgresBackend, PostgresConfig};
//! use shiftbook_persistence::router::TransactionRouter;
//!
//! # async fn main_example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = PostgresBackend::new(PostgresConfig::from_env()?).await?;
//! let router = TransactionRouter::with_defaults(Arc::new(backend));
//! router.bootstrap().await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod session;

pub use backend::{ENV_PREFIX, PostgresBackend, PostgresConfig, PostgresSslMode};
pub use session::PostgresSession;
