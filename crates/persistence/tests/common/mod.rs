//! Test infrastructure for the routing layer.
//!
//! Builds in-memory routers with a known set of tenant namespaces, plus a
//! few request context shortcuts.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use shiftbook_persistence::backends::memory::MemoryBackend;
use shiftbook_persistence::config::{PoolConfig, RouterConfig};
use shiftbook_persistence::migration::MigrationRunner;
use shiftbook_persistence::router::{RequestContext, TransactionRouter};
use shiftbook_persistence::schema::SchemaResolver;
use shiftbook_persistence::tenant::TenantContext;

/// Namespaces present in every fixture backend.
pub const FIXED_NAMESPACES: [&str; 2] = ["public", "unassigned"];

/// A backend and a router sharing it.
pub struct Fixture {
    pub backend: Arc<MemoryBackend>,
    pub router: TransactionRouter<MemoryBackend>,
}

impl Fixture {
    /// Fixture with the fixed namespaces plus one namespace per tenant.
    pub fn with_tenants(tenants: &[&str]) -> Self {
        Self::build(MemoryBackend::new(PoolConfig::default()), tenants, RouterConfig::default())
    }

    /// Fixture whose pool holds a single connection.
    pub fn single_connection(tenants: &[&str]) -> Self {
        Self::single_connection_with_timeout(tenants, Duration::from_secs(60))
    }

    /// Single-connection fixture whose acquires give up after `acquire_timeout`.
    pub fn single_connection_with_timeout(tenants: &[&str], acquire_timeout: Duration) -> Self {
        Self::build(
            MemoryBackend::new(PoolConfig::single_connection().with_acquire_timeout(acquire_timeout)),
            tenants,
            RouterConfig::default(),
        )
    }

    /// Fixture where every statement takes `latency`.
    pub fn with_latency(tenants: &[&str], latency: Duration, default_deadline: Duration) -> Self {
        Self::build(
            MemoryBackend::new(PoolConfig::default()).with_statement_latency(latency),
            tenants,
            RouterConfig::default().with_default_deadline(default_deadline),
        )
    }

    fn build(backend: MemoryBackend, tenants: &[&str], config: RouterConfig) -> Self {
        let backend = Arc::new(
            backend
                .with_namespaces(FIXED_NAMESPACES)
                .with_namespaces(tenants.iter().map(|t| format!("company_{}", t))),
        );
        let router = TransactionRouter::new(Arc::clone(&backend), SchemaResolver::default(), config);
        Self { backend, router }
    }

    /// A migration runner on this fixture's router.
    pub fn runner(&self) -> MigrationRunner<MemoryBackend> {
        MigrationRunner::new(self.router.clone())
    }

    /// Connections currently checked out of the pool.
    pub fn in_use(&self) -> usize {
        use shiftbook_persistence::core::NamespaceBackend;
        let status = self.backend.status();
        status.max_size - status.available
    }
}

/// A request context for `tenant`.
pub fn tenant_ctx(tenant: &str) -> RequestContext {
    RequestContext::for_tenant(TenantContext::new(tenant))
}

/// Lets spawned background rollbacks and watchdogs run.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
