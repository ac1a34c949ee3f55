//! PostgreSQL backend integration tests.
//!
//! Configuration tests run everywhere. Tests that need a server start a
//! PostgreSQL container with testcontainers and are ignored by default.
//!
//! Run with: `cargo test -p shiftbook-persistence --features postgres -- --ignored postgres_integration`

#![cfg(feature = "postgres")]

use std::time::Duration;

use shiftbook_persistence::backends::postgres::{PostgresConfig, PostgresSslMode};
use shiftbook_persistence::config::PoolConfig;

// ============================================================================
// Backend Configuration Tests (no PostgreSQL instance required)
// ============================================================================

#[test]
fn test_postgres_config_defaults() {
    let config = PostgresConfig::default();
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 5432);
    assert_eq!(config.dbname, "shiftbook");
    assert_eq!(config.user, "shiftbook");
    assert!(config.password.is_none());
    assert_eq!(config.ssl_mode, PostgresSslMode::Prefer);
    assert_eq!(config.pool.max_connections, 5);
    assert_eq!(config.pool.max_lifetime, Duration::from_secs(30 * 60));
}

#[test]
fn test_postgres_config_serialization() {
    let config = PostgresConfig {
        host: "pg-server".to_string(),
        port: 5433,
        dbname: "shifts".to_string(),
        user: "app".to_string(),
        password: Some("secret".to_string()),
        pool: PoolConfig::single_connection(),
        ..Default::default()
    };

    let json = serde_json::to_string(&config).unwrap();
    let deserialized: PostgresConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(deserialized.host, "pg-server");
    assert_eq!(deserialized.port, 5433);
    assert_eq!(deserialized.password, Some("secret".to_string()));
    assert_eq!(deserialized.pool.max_connections, 1);
}

#[test]
fn test_postgres_config_partial_json_uses_defaults() {
    let config: PostgresConfig = serde_json::from_str(r#"{"host": "db"}"#).unwrap();
    assert_eq!(config.host, "db");
    assert_eq!(config.port, 5432);
    assert_eq!(config.pool, PoolConfig::default());
}

// ============================================================================
// Integration Tests (requires Docker for testcontainers)
// ============================================================================

/// Integration tests against a real PostgreSQL instance.
///
/// Every test creates its own tenant schemas with a unique prefix, so the
/// tests can share one container.
#[cfg(test)]
mod postgres_integration {
    use std::sync::Arc;
    use std::time::Duration;

    use shiftbook_persistence::backends::postgres::{PostgresBackend, PostgresConfig, PostgresSslMode};
    use shiftbook_persistence::config::{PoolConfig, RouterConfig};
    use shiftbook_persistence::core::NamespaceBackend;
    use shiftbook_persistence::error::ErrorKind;
    use shiftbook_persistence::migration::{MigrationRunner, MigrationScript};
    use shiftbook_persistence::router::{DirectSchemaSession, RequestContext, TransactionRouter};
    use shiftbook_persistence::schema::{SchemaConfig, SchemaResolver};
    use shiftbook_persistence::tenant::{TenantContext, TenantId};

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::postgres::Postgres;
    use tokio::sync::OnceCell;

    /// Shared PostgreSQL container reused across all tests in this module.
    struct SharedPg {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary; dropped at process exit.
        _container: testcontainers::ContainerAsync<Postgres>,
    }

    static SHARED_PG: OnceCell<SharedPg> = OnceCell::const_new();

    async fn shared_pg() -> &'static SharedPg {
        SHARED_PG
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = Postgres::default()
                    .with_label("github.run_id", &run_id)
                    .start()
                    .await
                    .expect("Failed to start PostgreSQL container");

                let port = container
                    .get_host_port_ipv4(5432)
                    .await
                    .expect("Failed to get host port");

                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();

                SharedPg {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    async fn create_backend(pool: PoolConfig) -> PostgresBackend {
        let pg = shared_pg().await;
        let config = PostgresConfig {
            host: pg.host.clone(),
            port: pg.port,
            dbname: "postgres".to_string(),
            user: "postgres".to_string(),
            password: Some("postgres".to_string()),
            ssl_mode: PostgresSslMode::Disable,
            pool,
            ..Default::default()
        };
        PostgresBackend::new(config)
            .await
            .expect("Failed to create PostgresBackend")
    }

    /// A resolver whose tenant prefix is unique to one test.
    fn unique_resolver() -> SchemaResolver {
        let prefix = format!("t{}_", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        SchemaResolver::new(SchemaConfig::default().with_prefix(prefix)).unwrap()
    }

    /// Creates tenant schemas, each with a `shifts` table.
    async fn create_tenants(backend: &PostgresBackend, resolver: &SchemaResolver, tenants: &[&str]) {
        use shiftbook_persistence::core::NamespaceSession;
        let mut session = backend.acquire().await.unwrap();
        for tenant in tenants {
            let ns = resolver.resolve(&TenantId::new(*tenant)).unwrap();
            session.ensure_namespace(&ns).await.unwrap();
            session
                .batch_execute(&format!(
                    "CREATE TABLE IF NOT EXISTS {}.shifts (id BIGSERIAL PRIMARY KEY, day TEXT NOT NULL)",
                    ns.quoted()
                ))
                .await
                .unwrap();
        }
    }

    fn ctx(tenant: &str) -> RequestContext {
        RequestContext::for_tenant(TenantContext::new(tenant))
    }

    async fn count_shifts(router: &TransactionRouter<PostgresBackend>, tenant: &str) -> u64 {
        let (_, tx, _cancel) = router.open_tenant_transaction(&ctx(tenant)).await.unwrap();
        let count = tx.execute("SELECT 1 FROM shifts").await.unwrap();
        tx.rollback().await.unwrap();
        count
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_tenant_isolation() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a", "b"]).await;
        let router = TransactionRouter::new(Arc::clone(&backend), resolver, RouterConfig::default());

        let (_, tx, cancel) = router.open_tenant_transaction(&ctx("a")).await.unwrap();
        tx.execute("INSERT INTO shifts (day) VALUES ('mon')").await.unwrap();
        tx.commit().await.unwrap();
        cancel.cancel().await.unwrap();

        assert_eq!(count_shifts(&router, "a").await, 1);
        assert_eq!(count_shifts(&router, "b").await, 0);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_search_path_excludes_public() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a"]).await;
        let router = TransactionRouter::new(Arc::clone(&backend), resolver, RouterConfig::default());

        // A table that only exists in public must not be reachable unqualified
        let (_, tx, _cancel) = router.open_shared_transaction(&RequestContext::new()).await.unwrap();
        tx.execute("CREATE TABLE IF NOT EXISTS shared_only (id INT)").await.unwrap();
        tx.commit().await.unwrap();

        let (_, tx, _cancel) = router.open_tenant_transaction(&ctx("a")).await.unwrap();
        let err = tx.execute("SELECT * FROM shared_only").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
        assert!(err.namespace().is_some_and(|ns| ns.ends_with("_a")));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_missing_schema() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let router = TransactionRouter::new(Arc::clone(&backend), unique_resolver(), RouterConfig::default());

        let err = router.open_tenant_transaction(&ctx("ghost")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NamespaceUnavailable);
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_deadline_rolls_back() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a"]).await;
        let router = TransactionRouter::new(
            Arc::clone(&backend),
            resolver,
            RouterConfig::default().with_default_deadline(Duration::from_millis(200)),
        );

        let (_, tx, _cancel) = router.open_tenant_transaction(&ctx("a")).await.unwrap();
        tx.execute("INSERT INTO shifts (day) VALUES ('tue')").await.unwrap();
        let started = std::time::Instant::now();
        let err = tx.execute("SELECT pg_sleep(60)").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "deadline took {:?} to stop the statement",
            started.elapsed()
        );

        assert_eq!(count_shifts(&router, "a").await, 0);
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_cancel_interrupts_statement() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a"]).await;
        let router = TransactionRouter::new(Arc::clone(&backend), resolver, RouterConfig::default());

        let request = ctx("a").with_deadline_override(Duration::ZERO);
        let (_, tx, cancel) = router.open_tenant_transaction(&request).await.unwrap();
        let running = tokio::spawn(async move { tx.execute("SELECT pg_sleep(60)").await });
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        cancel.cancel().await.unwrap();
        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_failed_statement_blocks_commit() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a"]).await;
        let router = TransactionRouter::new(Arc::clone(&backend), resolver, RouterConfig::default());

        let (_, tx, _cancel) = router.open_tenant_transaction(&ctx("a")).await.unwrap();
        tx.execute("INSERT INTO shifts (day) VALUES ('wed')").await.unwrap();
        tx.execute("INSERT INTO missing_table VALUES (1)").await.unwrap_err();

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Database);
        assert_eq!(count_shifts(&router, "a").await, 0);
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_fan_out() {
        let backend = Arc::new(create_backend(PoolConfig::default()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a", "b", "c"]).await;
        let router = TransactionRouter::new(Arc::clone(&backend), resolver, RouterConfig::default());

        assert_eq!(router.list_tenant_namespaces().await.unwrap().len(), 3);

        let script = MigrationScript::new(
            "add_note.sql",
            "ALTER TABLE shifts ADD COLUMN IF NOT EXISTS note TEXT;\nUPDATE shifts SET note = 'migrated';",
        )
        .unwrap();
        let report = MigrationRunner::new(router.clone())
            .apply_to_all_tenants(&RequestContext::new(), &script)
            .await
            .unwrap();
        assert_eq!(report.processed(), 3);

        let (_, tx, _cancel) = router.open_tenant_transaction(&ctx("b")).await.unwrap();
        tx.execute("SELECT note FROM shifts").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires Docker"]
    async fn postgres_integration_direct_switch() {
        let backend = Arc::new(create_backend(PoolConfig::single_connection()).await);
        let resolver = unique_resolver();
        create_tenants(&backend, &resolver, &["a", "b"]).await;
        let direct = DirectSchemaSession::new(Arc::clone(&backend), resolver).unwrap();

        {
            let mut session = direct.switch(&ctx("a")).await.unwrap();
            session.execute("INSERT INTO shifts (day) VALUES ('thu')").await.unwrap();
        }
        let mut session = direct.switch(&ctx("b")).await.unwrap();
        let rows = session.execute("SELECT 1 FROM shifts").await.unwrap();
        assert_eq!(rows, 0);
    }
}
