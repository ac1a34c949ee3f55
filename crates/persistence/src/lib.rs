//! Shiftbook Persistence Layer
//!
//! This crate routes every unit of database work to the relational schema of
//! the tenant it belongs to. Given a request's tenant identity it opens a
//! transaction bound to exactly that tenant's namespace, enforces a deadline
//! on it and guarantees the transaction is rolled back on every exit path
//! that does not commit. A second mode applies raw migration scripts to every
//! tenant namespace in turn.
//!
//! # Features
//!
//! - **Schema-per-tenant routing**: one namespace per tenant plus a shared and an unassigned namespace
//! - **Deadlines**: per-request overrides, including an explicit "no deadline" value
//! - **Guaranteed teardown**: idempotent commit, rollback and cancel; dropped handles roll back
//! - **Migration fan-out**: sequential, resumable, with partial-failure reporting
//!
//! # Backend Features
//!
//! Enable backends with feature flags in `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! shiftbook-persistence = { version = "0.1", features = ["postgres"] }
//! ```
//!
//! Available backend features:
//! - `postgres` - PostgreSQL via `tokio-postgres` and a `deadpool-postgres` pool
//!
//! The in-memory backend is always available and backs the test suite.
//!
//! # Architecture
//!
//! - [`tenant`] - Tenant identity and deadline overrides
//! - [`schema`] - Tenant identifier to namespace resolution
//! - [`router`] - Tenant-scoped transactions, scopes and cancellation
//! - [`migration`] - Fan-out of raw scripts across tenant namespaces
//! - [`core`] - Backend traits and cancellation primitives
//! - [`backends`] - Backend implementations (memory, PostgreSQL)
//! - [`config`] - Pool and router configuration
//! - [`error`] - Error types for all operations
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use shiftbook_persistence::backends::memory::MemoryBackend;
//! use shiftbook_persistence::config::PoolConfig;
//! use shiftbook_persistence::router::{RequestContext, TransactionRouter};
//! use shiftbook_persistence::tenant::TenantContext;
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(
//!     MemoryBackend::new(PoolConfig::default()).with_namespaces(["public", "company_acme"]),
//! );
//! let router = TransactionRouter::with_defaults(backend);
//!
//! // Request-scoped work with the default deadline
//! let ctx = RequestContext::for_tenant(TenantContext::new("acme"));
//! let (scope, tx, cancel) = router.open_tenant_transaction(&ctx).await.unwrap();
//! assert_eq!(scope.namespace().name(), "company_acme");
//! tx.execute("UPDATE shifts SET note = 'ok'").await.unwrap();
//! tx.commit().await.unwrap();
//! cancel.cancel().await.unwrap();
//!
//! // Administrative work without a deadline
//! let admin = ctx.with_deadline_override(Duration::ZERO);
//! let (scope, _tx, _cancel) = router.open_tenant_transaction(&admin).await.unwrap();
//! assert!(scope.deadline().is_none());
//! # });
//! ```
//!
//! # Fan-Out
//!
//! ```
//! use std::sync::Arc;
//! use shiftbook_persistence::backends::memory::MemoryBackend;
//! use shiftbook_persistence::config::PoolConfig;
//! use shiftbook_persistence::migration::{MigrationRunner, MigrationScript};
//! use shiftbook_persistence::router::{RequestContext, TransactionRouter};
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(
//!     MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_a", "company_b"]),
//! );
//! let runner = MigrationRunner::new(TransactionRouter::with_defaults(backend));
//! let script = MigrationScript::new("add_note.sql", "ALTER TABLE shifts ADD COLUMN note TEXT").unwrap();
//!
//! let report = runner.apply_to_all_tenants(&RequestContext::new(), &script).await.unwrap();
//! assert_eq!(report.processed(), 2);
//! # });
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backends;
pub mod config;
pub mod core;
pub mod error;
pub mod migration;
pub mod router;
pub mod schema;
pub mod tenant;

// Re-export commonly used types at crate root
pub use error::{ErrorKind, StorageError, StorageResult};
pub use tenant::{DeadlineOverride, TenantContext, TenantId};

// Re-export core traits
pub use core::{BackendKind, BindScope, CancelSignal, NamespaceBackend, NamespaceSession};

pub use migration::{FanOutOptions, MigrationReport, MigrationRunner, MigrationScript};
pub use router::{
    CancelHandle, DirectSchemaSession, RequestContext, TenantTransaction, TransactionRouter,
    TransactionScope,
};
pub use schema::{Namespace, NamespaceKind, SchemaConfig, SchemaResolver};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
