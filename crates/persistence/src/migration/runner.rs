//! Sequential fan-out of one script across every tenant namespace.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::NamespaceBackend;
use crate::error::{MigrationError, StorageResult, ValidationError};
use crate::router::{RequestContext, TransactionRouter};
use crate::schema::Namespace;

use super::script::MigrationScript;

/// Options for one fan-out run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutOptions {
    /// Skip every namespace ordered before this one.
    pub resume_from: Option<String>,
    /// Enumerate the target namespaces without opening any transaction.
    pub dry_run: bool,
}

impl FanOutOptions {
    /// Resumes at the given tenant namespace, usually the one a previous run failed at.
    pub fn with_resume_from(mut self, namespace: impl Into<String>) -> Self {
        self.resume_from = Some(namespace.into());
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Outcome of a successful fan-out.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Script name.
    pub script: String,
    /// Number of tenant namespaces found.
    pub total: usize,
    /// Namespaces the script was committed to during this run, in order.
    /// In dry-run mode, the namespaces it would have been applied to.
    pub applied: Vec<String>,
    /// Namespaces skipped because they precede the resume point.
    pub skipped: Vec<String>,
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl MigrationReport {
    /// Number of namespaces processed in this run.
    pub fn processed(&self) -> usize {
        self.applied.len()
    }
}

/// Applies raw scripts to all tenant namespaces, one transaction per namespace.
///
/// Namespaces are visited in lexicographic order. The first failure stops
/// the run; namespaces already committed stay committed, and the error
/// reports how far the run got so it can be resumed with
/// [`FanOutOptions::with_resume_from`].
#[derive(Debug)]
pub struct MigrationRunner<B: NamespaceBackend> {
    router: TransactionRouter<B>,
}

impl<B: NamespaceBackend> Clone for MigrationRunner<B> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
        }
    }
}

impl<B: NamespaceBackend> MigrationRunner<B> {
    /// Creates a runner on top of a router.
    pub fn new(router: TransactionRouter<B>) -> Self {
        Self { router }
    }

    /// The router used to open per-namespace transactions.
    pub fn router(&self) -> &TransactionRouter<B> {
        &self.router
    }

    /// Applies `script` to every tenant namespace.
    ///
    /// Each namespace gets its own transaction with the deadline disabled.
    /// With no tenant namespaces the run succeeds with nothing applied.
    pub async fn apply_to_all_tenants(
        &self,
        ctx: &RequestContext,
        script: &MigrationScript,
    ) -> StorageResult<MigrationReport> {
        self.apply_with_options(ctx, script, &FanOutOptions::default())
            .await
    }

    /// Applies `script` with explicit resume and dry-run options.
    pub async fn apply_with_options(
        &self,
        ctx: &RequestContext,
        script: &MigrationScript,
        options: &FanOutOptions,
    ) -> StorageResult<MigrationReport> {
        script.validate()?;
        let started_at = Utc::now();

        let namespaces = self.router.list_tenant_namespaces().await?;
        let total = namespaces.len();

        let start = match &options.resume_from {
            Some(resume) => namespaces
                .iter()
                .position(|ns| ns.name() == resume)
                .ok_or_else(|| ValidationError::UnknownResumePoint {
                    namespace: resume.clone(),
                })?,
            None => 0,
        };
        let skipped: Vec<String> = names(&namespaces[..start]);
        let pending = &namespaces[start..];

        tracing::info!(
            script = %script.name(),
            total,
            skipped = skipped.len(),
            dry_run = options.dry_run,
            "Starting migration fan-out"
        );

        if options.dry_run {
            for namespace in pending {
                tracing::info!(script = %script.name(), namespace = %namespace, "Would apply migration");
            }
            return Ok(MigrationReport {
                script: script.name().to_string(),
                total,
                applied: names(pending),
                skipped,
                dry_run: true,
                started_at,
                finished_at: Utc::now(),
            });
        }

        let ctx = ctx.without_deadline();
        let mut applied = Vec::with_capacity(pending.len());

        for (offset, namespace) in pending.iter().enumerate() {
            let position = start + offset;
            if let Err(e) = self.apply_one(&ctx, namespace, script).await {
                tracing::error!(
                    script = %script.name(),
                    namespace = %namespace,
                    position,
                    applied = start + applied.len(),
                    total,
                    error = %e,
                    "Migration failed"
                );
                return Err(MigrationError::Failed {
                    script: script.name().to_string(),
                    applied: start + applied.len(),
                    total,
                    namespace: namespace.name().to_string(),
                    position,
                    source: Box::new(e),
                }
                .into());
            }
            tracing::info!(
                script = %script.name(),
                namespace = %namespace,
                step = position + 1,
                total,
                "Migration applied"
            );
            applied.push(namespace.name().to_string());
        }

        tracing::info!(
            script = %script.name(),
            applied = applied.len(),
            skipped = skipped.len(),
            "Migration fan-out complete"
        );

        Ok(MigrationReport {
            script: script.name().to_string(),
            total,
            applied,
            skipped,
            dry_run: false,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn apply_one(
        &self,
        ctx: &RequestContext,
        namespace: &Namespace,
        script: &MigrationScript,
    ) -> StorageResult<()> {
        let (_scope, tx, cancel) = self
            .router
            .open_namespace_transaction(ctx, namespace.clone())
            .await?;

        let result = match tx.batch_execute(script.sql()).await {
            Ok(()) => tx.commit().await,
            Err(e) => Err(e),
        };

        if let Err(e) = cancel.cancel().await {
            tracing::warn!(namespace = %namespace, error = %e, "Rollback after failed migration failed");
        }
        result
    }
}

fn names(namespaces: &[Namespace]) -> Vec<String> {
    namespaces.iter().map(|ns| ns.name().to_string()).collect()
}
