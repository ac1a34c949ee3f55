//! Shiftbook admin tool
//!
//! Applies migration scripts to every tenant schema and checks the database
//! the Shiftbook backend runs against.

mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use shiftbook_persistence::backends::postgres::{PostgresBackend, PostgresConfig};
use shiftbook_persistence::config::{PoolConfig, RouterConfig};
use shiftbook_persistence::core::NamespaceBackend;
use shiftbook_persistence::migration::{FanOutOptions, MigrationRunner, MigrationScript};
use shiftbook_persistence::router::{RequestContext, TransactionRouter};
use shiftbook_persistence::schema::{SchemaConfig, SchemaResolver};
use tracing::info;

use cli::{AdminConfig, Command, MigrateArgs};

/// Initializes the tracing subscriber. `RUST_LOG` overrides `level`.
fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "shiftbook_admin={level},shiftbook_persistence={level}"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Connects to PostgreSQL from `--database-url` or the `SHIFTBOOK_PG_*` variables.
async fn connect(config: &AdminConfig) -> anyhow::Result<PostgresBackend> {
    let pg_config = match &config.database_url {
        Some(url) => {
            let mut pg_config = PostgresConfig::parse_connection_string(url)?;
            pg_config.pool = PoolConfig::from_lookup(
                shiftbook_persistence::backends::postgres::ENV_PREFIX,
                |key| std::env::var(key).ok(),
            )?;
            pg_config
        }
        None => PostgresConfig::from_env()?,
    };

    info!(
        host = %pg_config.host,
        port = pg_config.port,
        dbname = %pg_config.dbname,
        "Connecting to PostgreSQL"
    );
    Ok(PostgresBackend::new(pg_config).await?)
}

async fn build_router(config: &AdminConfig) -> anyhow::Result<TransactionRouter<PostgresBackend>> {
    let resolver = SchemaResolver::new(SchemaConfig::default().with_prefix(&config.schema_prefix))?;
    let backend = connect(config).await?;
    Ok(TransactionRouter::new(
        Arc::new(backend),
        resolver,
        RouterConfig::from_env()?,
    ))
}

/// Returns a request context that is cancelled on Ctrl-C.
fn interruptible_context() -> RequestContext {
    let ctx = RequestContext::new().with_correlation_id(format!("admin-{}", std::process::id()));
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; rolling back the current schema and stopping");
            on_signal.cancel();
        }
    });
    ctx
}

async fn migrate(router: TransactionRouter<PostgresBackend>, args: &MigrateArgs) -> anyhow::Result<()> {
    let script = MigrationScript::load(&args.script, &args.scripts_dir).await?;

    let mut options = FanOutOptions::default().with_dry_run(args.dry_run);
    if let Some(resume) = &args.resume_from {
        options = options.with_resume_from(resume.clone());
    }

    let runner = MigrationRunner::new(router);
    let report = runner
        .apply_with_options(&interruptible_context(), &script, &options)
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.dry_run {
        for namespace in &report.applied {
            println!("{}", namespace);
        }
        println!(
            "Dry run: {} would be applied to {} schemas",
            report.script,
            report.processed()
        );
    } else {
        println!(
            "Migration {} applied to {} schemas ({} skipped)",
            report.script,
            report.processed(),
            report.skipped.len()
        );
    }
    Ok(())
}

async fn list_schemas(router: TransactionRouter<PostgresBackend>) -> anyhow::Result<()> {
    let namespaces = router.list_tenant_namespaces().await?;
    for namespace in &namespaces {
        println!("{}", namespace);
    }
    info!(count = namespaces.len(), "Listed tenant schemas");
    Ok(())
}

async fn check(router: TransactionRouter<PostgresBackend>) -> anyhow::Result<()> {
    router.backend().health_check().await?;
    router.bootstrap().await?;

    let status = router.backend().status();
    let tenants = router.list_tenant_namespaces().await?;
    println!(
        "ok: pool {}/{} connections, {} tenant schemas, shared schema {}",
        status.size,
        status.max_size,
        tenants.len(),
        router.resolver().shared()
    );
    Ok(())
}

async fn run(config: AdminConfig) -> anyhow::Result<()> {
    let router = build_router(&config).await?;
    match &config.command {
        Command::Migrate(args) => migrate(router, args).await,
        Command::Schemas => list_schemas(router).await,
        Command::Check => check(router).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = AdminConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Storage errors already carry their cause in the message
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
