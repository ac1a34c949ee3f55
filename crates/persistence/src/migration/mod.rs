//! Administrative fan-out of raw SQL scripts.
//!
//! - [`MigrationScript`] - A script loaded from disk or given inline
//! - [`MigrationRunner`] - Applies a script to every tenant namespace in order
//! - [`FanOutOptions`] / [`MigrationReport`] - Resume, dry run and the run summary

mod runner;
mod script;

pub use runner::{FanOutOptions, MigrationReport, MigrationRunner};
pub use script::MigrationScript;
