//! Pooled PostgreSQL connection implementing [`NamespaceSession`].

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::Client;
use tokio_postgres::NoTls;

use crate::core::{BindScope, NamespaceSession};
use crate::error::{BackendError, NamespaceError, StorageError, StorageResult};
use crate::schema::Namespace;

const NAMESPACE_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_catalog.pg_namespace WHERE nspname = $1)";

const SET_SEARCH_PATH_SQL: &str = "SELECT pg_catalog.set_config('search_path', $1, $2)";

const SET_STATEMENT_TIMEOUT_SQL: &str =
    "SELECT pg_catalog.set_config('statement_timeout', $1, true)";

const LIST_NAMESPACES_SQL: &str = "SELECT nspname::text FROM pg_catalog.pg_namespace \
     WHERE starts_with(nspname::text, $1::text) ORDER BY nspname";

/// A pooled PostgreSQL connection.
///
/// The search path is always set to exactly one quoted namespace, without
/// `public` or any other fallback, so unqualified names can only resolve
/// inside the bound namespace.
pub struct PostgresSession {
    /// Option so the connection can be detached from the pool on drop.
    client: Option<Client>,
    in_transaction: bool,
    /// A statement failed; the server now rejects everything but ROLLBACK.
    aborted: bool,
    /// A statement was sent and its future dropped before the reply arrived.
    in_flight: bool,
}

impl std::fmt::Debug for PostgresSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSession")
            .field("in_transaction", &self.in_transaction)
            .field("aborted", &self.aborted)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl PostgresSession {
    pub(super) fn new(client: Client) -> Self {
        Self {
            client: Some(client),
            in_transaction: false,
            aborted: false,
            in_flight: false,
        }
    }

    fn track<T>(&mut self, result: Result<T, tokio_postgres::Error>) -> Result<T, BackendError> {
        if result.is_err() && self.in_transaction {
            self.aborted = true;
        }
        Ok(result?)
    }

    /// Asks the server to cancel the statement still running on this
    /// connection. Dropping the statement's future does not stop it.
    async fn interrupt(&mut self) -> Result<(), BackendError> {
        let token = self.client()?.cancel_token();
        if let Err(e) = token.cancel_query(NoTls).await {
            tracing::warn!(error = %e, "Failed to cancel abandoned statement");
        }
        self.in_flight = false;
        self.aborted = self.in_transaction;
        Ok(())
    }

    fn client(&self) -> Result<&Client, BackendError> {
        self.client.as_ref().ok_or_else(|| BackendError::Internal {
            backend_name: "postgres".to_string(),
            message: "connection already released".to_string(),
            source: None,
        })
    }
}

#[async_trait]
impl NamespaceSession for PostgresSession {
    async fn begin(&mut self) -> Result<(), BackendError> {
        self.client()?.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        self.aborted = false;
        Ok(())
    }

    async fn bind_namespace(&mut self, namespace: &Namespace, scope: BindScope) -> StorageResult<()> {
        let name = namespace.name();
        let client = self.client()?;

        let exists: bool = client
            .query_one(NAMESPACE_EXISTS_SQL, &[&name])
            .await
            .and_then(|row| row.try_get(0))
            .map_err(|e| StorageError::in_namespace(name, e.into()))?;

        if !exists {
            return Err(StorageError::Namespace(NamespaceError::Unavailable {
                namespace: name.to_string(),
                message: "schema does not exist".to_string(),
            }));
        }

        let is_local = matches!(scope, BindScope::Transaction);
        client
            .query_one(SET_SEARCH_PATH_SQL, &[&namespace.quoted(), &is_local])
            .await
            .map_err(|e| {
                StorageError::Namespace(NamespaceError::Unavailable {
                    namespace: name.to_string(),
                    message: e.to_string(),
                })
            })?;

        tracing::trace!(namespace = name, is_local, "search_path bound");
        Ok(())
    }

    async fn limit_statement_time(&mut self, timeout: Duration) -> Result<(), BackendError> {
        // A bare number is read as milliseconds; 0 would disable the limit.
        let millis = timeout.as_millis().max(1).to_string();
        self.client()?
            .query_one(SET_STATEMENT_TIMEOUT_SQL, &[&millis])
            .await?;
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        self.in_flight = true;
        let result = self.client()?.execute(sql, &[]).await;
        self.in_flight = false;
        self.track(result)
    }

    async fn batch_execute(&mut self, sql: &str) -> Result<(), BackendError> {
        self.in_flight = true;
        let result = self.client()?.batch_execute(sql).await;
        self.in_flight = false;
        self.track(result)
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        // PostgreSQL answers COMMIT of an aborted transaction with a silent ROLLBACK.
        if self.aborted || self.in_flight {
            self.rollback().await?;
            return Err(BackendError::Query {
                backend_name: "postgres".to_string(),
                message: "current transaction is aborted; changes were rolled back".to_string(),
                code: Some("25P02".to_string()),
                source: None,
            });
        }
        self.client()?.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        if self.in_flight {
            self.interrupt().await?;
        }
        self.client()?.batch_execute("ROLLBACK").await?;
        self.in_transaction = false;
        self.aborted = false;
        Ok(())
    }

    async fn list_namespaces(&mut self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let rows = self.client()?.query(LIST_NAMESPACES_SQL, &[&prefix]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(BackendError::from))
            .collect()
    }

    async fn ensure_namespace(&mut self, namespace: &Namespace) -> Result<(), BackendError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", namespace.quoted());
        self.client()?.batch_execute(&sql).await?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        // A connection whose transaction state is unknown must not be reused.
        if self.in_transaction {
            if let Some(client) = self.client.take() {
                tracing::warn!("PostgreSQL connection dropped inside a transaction; detaching it from the pool");
                drop(Client::take(client));
            }
        }
    }
}
