//! Command line configuration for the admin tool.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Log levels accepted by `--log-level`.
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Admin tool configuration.
///
/// Connection settings come from `--database-url` or, when it is absent,
/// from the `SHIFTBOOK_PG_*` environment variables.
#[derive(Debug, Clone, Parser)]
#[command(name = "shiftbook-admin")]
#[command(about = "Shiftbook tenant schema administration")]
#[command(version)]
pub struct AdminConfig {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "SHIFTBOOK_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Database connection string.
    #[arg(long, env = "SHIFTBOOK_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Prefix shared by all tenant schema names.
    #[arg(long, env = "SHIFTBOOK_SCHEMA_PREFIX", default_value = "company_", global = true)]
    pub schema_prefix: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Admin subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Apply a SQL script to every tenant schema, one transaction per schema.
    Migrate(MigrateArgs),

    /// List tenant schemas in fan-out order.
    Schemas,

    /// Check pool health and create the shared and unassigned schemas if missing.
    Check,
}

/// Arguments of `migrate`.
#[derive(Debug, Clone, Args)]
pub struct MigrateArgs {
    /// Script name inside the scripts directory (".sql" may be omitted), or an absolute path.
    pub script: String,

    /// Directory relative script names are resolved against.
    #[arg(long, env = "SHIFTBOOK_SCRIPTS_DIR", default_value = "migrations")]
    pub scripts_dir: PathBuf,

    /// Skip every schema ordered before this one.
    #[arg(long)]
    pub resume_from: Option<String>,

    /// List the schemas the script would be applied to without touching them.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the run report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl AdminConfig {
    /// Validates values clap cannot check on its own.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !LOG_LEVELS.contains(&self.log_level.to_ascii_lowercase().as_str()) {
            errors.push(format!(
                "Invalid log level '{}', expected one of {}",
                self.log_level,
                LOG_LEVELS.join(", ")
            ));
        }

        if self.schema_prefix.is_empty() {
            errors.push("Schema prefix cannot be empty".to_string());
        }

        if let Command::Migrate(args) = &self.command {
            if args.script.trim().is_empty() {
                errors.push("Script name cannot be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
