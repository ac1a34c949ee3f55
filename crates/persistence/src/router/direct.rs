//! Session-level namespace switching on a dedicated single connection.
//!
//! Switching the namespace of a whole session (rather than of one
//! transaction) is only sound when no other unit of work can ever observe
//! that session. [`DirectSchemaSession`] therefore refuses to exist on a pool
//! with more than one connection, keeps that one connection for itself and
//! serializes every user behind a mutex held for the whole operation.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::core::{BindScope, NamespaceBackend, NamespaceSession};
use crate::error::{StorageError, StorageResult, TransactionError, ValidationError};
use crate::schema::{Namespace, SchemaResolver};

use super::context::RequestContext;

/// Exclusive, session-scoped namespace switching.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shiftbook_persistence::backends::memory::MemoryBackend;
/// use shiftbook_persistence::router::{DirectSchemaSession, RequestContext};
/// use shiftbook_persistence::schema::SchemaResolver;
/// use shiftbook_persistence::tenant::TenantContext;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = Arc::new(MemoryBackend::single_connection().with_namespaces(["company_acme"]));
/// let direct = DirectSchemaSession::new(backend, SchemaResolver::default())?;
///
/// let ctx = RequestContext::for_tenant(TenantContext::new("acme"));
/// let mut session = direct.switch(&ctx).await?;
/// session.execute("UPDATE settings SET value = 1").await?;
/// # Ok(())
/// # }
/// ```
pub struct DirectSchemaSession<B: NamespaceBackend> {
    backend: Arc<B>,
    resolver: SchemaResolver,
    connection: Mutex<Option<B::Session>>,
}

impl<B: NamespaceBackend> std::fmt::Debug for DirectSchemaSession<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectSchemaSession")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

impl<B: NamespaceBackend> DirectSchemaSession<B> {
    /// Creates the switcher. Fails unless the backend pool holds exactly one connection.
    pub fn new(backend: Arc<B>, resolver: SchemaResolver) -> StorageResult<Self> {
        let max_connections = backend.max_connections();
        if max_connections != 1 {
            return Err(ValidationError::SharedSessionRequiresSingleConnection {
                max_connections,
            }
            .into());
        }
        Ok(Self {
            backend,
            resolver,
            connection: Mutex::new(None),
        })
    }

    /// Waits for exclusive use of the connection and switches it to the
    /// request's tenant namespace.
    ///
    /// The returned guard keeps every other caller out until it is dropped.
    pub async fn switch(&self, ctx: &RequestContext) -> StorageResult<DirectSessionGuard<'_, B::Session>> {
        let tenant = ctx.tenant()?;
        let namespace = self.resolver.resolve(tenant.tenant_id())?;

        let mut connection = self.connection.lock().await;
        if ctx.is_cancelled() {
            return Err(TransactionError::Cancelled {
                namespace: namespace.name().to_string(),
            }
            .into());
        }

        if connection.is_none() {
            let session = self
                .backend
                .acquire()
                .await
                .map_err(|e| StorageError::acquiring(namespace.name(), e))?;
            *connection = Some(session);
        }

        let bound = match connection.as_mut() {
            Some(session) => session.bind_namespace(&namespace, BindScope::Session).await,
            None => Ok(()),
        };
        if let Err(e) = bound {
            // Never reuse a session whose binding is unknown.
            *connection = None;
            return Err(e);
        }

        tracing::debug!(namespace = %namespace, "Session switched to tenant schema");

        let session = MutexGuard::try_map(connection, |c| c.as_mut()).map_err(|_| {
            StorageError::from(TransactionError::InvalidTransaction {
                namespace: namespace.name().to_string(),
            })
        })?;
        Ok(DirectSessionGuard { session, namespace })
    }
}

/// Exclusive access to the switched session.
#[derive(Debug)]
pub struct DirectSessionGuard<'a, S> {
    session: MappedMutexGuard<'a, S>,
    namespace: Namespace,
}

impl<S: NamespaceSession> DirectSessionGuard<'_, S> {
    /// The namespace the session is switched to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Runs one statement in autocommit mode.
    pub async fn execute(&mut self, sql: &str) -> StorageResult<u64> {
        self.session
            .execute(sql)
            .await
            .map_err(|e| StorageError::in_namespace(self.namespace.name(), e))
    }

    /// Runs a script in autocommit mode.
    pub async fn batch_execute(&mut self, sql: &str) -> StorageResult<()> {
        self.session
            .batch_execute(sql)
            .await
            .map_err(|e| StorageError::in_namespace(self.namespace.name(), e))
    }
}

impl<S> Deref for DirectSessionGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> DerefMut for DirectSessionGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::memory::MemoryBackend;
    use crate::config::PoolConfig;
    use crate::error::ErrorKind;
    use crate::tenant::TenantContext;

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::for_tenant(TenantContext::new(tenant))
    }

    #[test]
    fn test_rejects_multi_connection_pool() {
        let backend = Arc::new(MemoryBackend::new(PoolConfig::default()));
        let err = DirectSchemaSession::new(backend, SchemaResolver::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_switch_binds_session() {
        let backend = Arc::new(
            MemoryBackend::single_connection().with_namespaces(["company_a", "company_b"]),
        );
        let direct = DirectSchemaSession::new(Arc::clone(&backend), SchemaResolver::default()).unwrap();

        {
            let mut session = direct.switch(&ctx("a")).await.unwrap();
            assert_eq!(session.namespace().name(), "company_a");
            session.execute("INSERT INTO a VALUES (1)").await.unwrap();
        }
        {
            let mut session = direct.switch(&ctx("b")).await.unwrap();
            session.execute("INSERT INTO b VALUES (1)").await.unwrap();
        }

        assert_eq!(backend.committed("company_a"), vec!["INSERT INTO a VALUES (1)"]);
        assert_eq!(backend.committed("company_b"), vec!["INSERT INTO b VALUES (1)"]);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_rejected() {
        let backend = Arc::new(MemoryBackend::single_connection());
        let direct = DirectSchemaSession::new(backend, SchemaResolver::default()).unwrap();
        let err = direct.switch(&RequestContext::new()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTenant);
    }

    #[tokio::test]
    async fn test_failed_switch_discards_connection() {
        let backend = Arc::new(MemoryBackend::single_connection().with_namespaces(["company_a"]));
        let direct = DirectSchemaSession::new(Arc::clone(&backend), SchemaResolver::default()).unwrap();

        drop(direct.switch(&ctx("a")).await.unwrap());
        let err = direct.switch(&ctx("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NamespaceUnavailable);
        assert_eq!(backend.status().available, 1);
    }

    #[tokio::test]
    async fn test_switch_serializes_callers() {
        let backend = Arc::new(MemoryBackend::single_connection().with_namespaces(["company_a", "company_b"]));
        let direct = Arc::new(DirectSchemaSession::new(Arc::clone(&backend), SchemaResolver::default()).unwrap());

        let held = direct.switch(&ctx("a")).await.unwrap();

        let other = Arc::clone(&direct);
        let waiter = tokio::spawn(async move {
            let session = other.switch(&ctx("b")).await.unwrap();
            session.namespace().name().to_string()
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), "company_b");
    }
}
