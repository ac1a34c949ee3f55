//! Tenant-scoped transaction routing.
//!
//! The [`TransactionRouter`] turns a [`RequestContext`] into a transaction
//! bound to the right namespace:
//!
//! ```text
//! RequestContext ── tenant ──> SchemaResolver ──> Namespace
//!        │                                            │
//!        └── deadline override ─┐                     ▼
//!                               ▼            acquire, BEGIN, bind
//!                      TransactionScope  <──  TenantTransaction + CancelHandle
//! ```
//!
//! Every open returns the same triple: the derived [`TransactionScope`], the
//! [`TenantTransaction`] handle and its [`CancelHandle`]. Callers commit the
//! handle when the work succeeds and always cancel (or drop) the cancel
//! handle; anything not committed is rolled back.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use shiftbook_persistence::backends::memory::MemoryBackend;
//! use shiftbook_persistence::config::PoolConfig;
//! use shiftbook_persistence::router::{RequestContext, TransactionRouter};
//! use shiftbook_persistence::tenant::TenantContext;
//!
//! # tokio_test::block_on(async {
//! let backend = Arc::new(MemoryBackend::new(PoolConfig::default()).with_namespaces(["company_acme"]));
//! let router = TransactionRouter::with_defaults(Arc::clone(&backend));
//!
//! let ctx = RequestContext::for_tenant(TenantContext::new("acme"));
//! let (_scope, tx, cancel) = router.open_tenant_transaction(&ctx).await.unwrap();
//! tx.execute("INSERT INTO shifts (day) VALUES ('mon')").await.unwrap();
//! tx.commit().await.unwrap();
//! cancel.cancel().await.unwrap();
//!
//! assert_eq!(backend.committed("company_acme").len(), 1);
//! # });
//! ```

mod context;
mod direct;
mod scope;
mod transaction;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::RouterConfig;
use crate::core::{BindScope, NamespaceBackend, NamespaceSession};
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::schema::{Namespace, SchemaResolver};

pub use context::RequestContext;
pub use direct::{DirectSchemaSession, DirectSessionGuard};
pub use scope::TransactionScope;
pub use transaction::{CancelHandle, RollbackReason, TenantTransaction, TransactionStatus};

use transaction::{TxSlot, watch_scope};

/// The scope, handle and cancel handle returned by every open.
pub type OpenedTransaction<S> = (TransactionScope, TenantTransaction<S>, CancelHandle<S>);

/// Opens namespace-bound transactions against a shared pool.
///
/// The router holds no mutable state of its own; it is cheap to clone and
/// safe to share between request tasks.
pub struct TransactionRouter<B: NamespaceBackend> {
    backend: Arc<B>,
    resolver: SchemaResolver,
    config: RouterConfig,
}

impl<B: NamespaceBackend> Clone for TransactionRouter<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            resolver: self.resolver.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: NamespaceBackend> std::fmt::Debug for TransactionRouter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRouter")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: NamespaceBackend> TransactionRouter<B> {
    /// Creates a router.
    pub fn new(backend: Arc<B>, resolver: SchemaResolver, config: RouterConfig) -> Self {
        Self {
            backend,
            resolver,
            config,
        }
    }

    /// Creates a router with the default naming scheme and default deadline.
    pub fn with_defaults(backend: Arc<B>) -> Self {
        Self::new(backend, SchemaResolver::default(), RouterConfig::default())
    }

    /// Returns the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Returns the resolver.
    pub fn resolver(&self) -> &SchemaResolver {
        &self.resolver
    }

    /// Returns the router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Idempotently creates the shared and unassigned namespaces.
    ///
    /// Called once at process start; tenant namespaces are never created here.
    pub async fn bootstrap(&self) -> StorageResult<()> {
        let mut session = self.backend.acquire().await?;
        for namespace in self.resolver.fixed_namespaces() {
            session
                .ensure_namespace(namespace)
                .await
                .map_err(|e| StorageError::in_namespace(namespace.name(), e))?;
            tracing::debug!(namespace = %namespace, kind = %namespace.kind(), "Registered namespace");
        }
        Ok(())
    }

    /// Opens a transaction bound to the request tenant's namespace.
    ///
    /// Fails with `InvalidTenant` when the context carries no tenant or the
    /// tenant identifier cannot be resolved. Nothing is acquired from the pool
    /// in that case.
    pub async fn open_tenant_transaction(
        &self,
        ctx: &RequestContext,
    ) -> StorageResult<OpenedTransaction<B::Session>> {
        let tenant = ctx.tenant()?;
        let namespace = self.resolver.resolve(tenant.tenant_id())?;
        self.open_namespace_transaction(ctx, namespace).await
    }

    /// Opens a transaction bound to the shared namespace.
    ///
    /// The tenant slot is optional here; if present, its deadline override
    /// is honored.
    pub async fn open_shared_transaction(
        &self,
        ctx: &RequestContext,
    ) -> StorageResult<OpenedTransaction<B::Session>> {
        self.open_namespace_transaction(ctx, self.resolver.shared().clone())
            .await
    }

    /// Opens a transaction bound to the unassigned namespace.
    ///
    /// The router never routes here on its own; this is for the code that
    /// deliberately parks or repairs orphaned data.
    pub async fn open_unassigned_transaction(
        &self,
        ctx: &RequestContext,
    ) -> StorageResult<OpenedTransaction<B::Session>> {
        self.open_namespace_transaction(ctx, self.resolver.unassigned().clone())
            .await
    }

    /// Lists tenant namespaces in lexicographic order.
    pub async fn list_tenant_namespaces(&self) -> StorageResult<Vec<Namespace>> {
        let mut session = self.backend.acquire().await?;
        let names = session
            .list_namespaces(self.resolver.tenant_prefix())
            .await?;

        let mut namespaces: Vec<Namespace> = names
            .iter()
            .filter_map(|name| self.resolver.classify(name))
            .filter(Namespace::is_tenant)
            .collect();
        namespaces.sort();
        namespaces.dedup();
        Ok(namespaces)
    }

    pub(crate) async fn open_namespace_transaction(
        &self,
        ctx: &RequestContext,
        namespace: Namespace,
    ) -> StorageResult<OpenedTransaction<B::Session>> {
        let cancelled = || -> StorageError {
            TransactionError::Cancelled {
                namespace: namespace.name().to_string(),
            }
            .into()
        };

        if ctx.is_cancelled() {
            return Err(cancelled());
        }

        let mut session = tokio::select! {
            biased;
            _ = ctx.signal().cancelled() => return Err(cancelled()),
            acquired = self.backend.acquire() => {
                acquired.map_err(|e| StorageError::acquiring(namespace.name(), e))?
            }
        };

        session
            .begin()
            .await
            .map_err(|e| StorageError::acquiring(namespace.name(), e))?;

        let budget = ctx.effective_deadline(self.config.default_deadline);
        let bound = async {
            session.bind_namespace(&namespace, BindScope::Transaction).await?;
            if let Some(budget) = budget {
                session
                    .limit_statement_time(budget)
                    .await
                    .map_err(|e| StorageError::in_namespace(namespace.name(), e))?;
            }
            Ok::<_, StorageError>(())
        }
        .await;

        if let Err(e) = bound {
            if let Err(rollback_err) = session.rollback().await {
                tracing::warn!(
                    namespace = %namespace,
                    error = %rollback_err,
                    "Rollback after failed namespace bind failed"
                );
            }
            return Err(e);
        }

        let scope = TransactionScope::new(
            namespace,
            budget,
            ctx.signal().child(),
            ctx.correlation_id().map(str::to_string),
        );

        let slot = Arc::new(Mutex::new(TxSlot::open(session)));
        tokio::spawn(watch_scope(Arc::downgrade(&slot), scope.clone()));

        tracing::debug!(
            transaction_id = %scope.transaction_id(),
            namespace = %scope.namespace(),
            deadline_ms = budget.map(|b| b.as_millis() as u64),
            correlation_id = scope.correlation_id(),
            "Transaction opened"
        );

        let cancel = CancelHandle::new(Arc::downgrade(&slot), scope.clone());
        let tx = TenantTransaction::new(scope.clone(), slot);
        Ok((scope, tx, cancel))
    }
}
