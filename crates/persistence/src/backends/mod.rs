//! Database backend implementations.
//!
//! # Available Backends
//!
//! | Backend | Feature | Description |
//! |---------|---------|-------------|
//! | Memory | always | In-process backend with statement journals, for tests and tooling |
//! | PostgreSQL | `postgres` | Schema-per-tenant PostgreSQL with a deadpool connection pool |

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;
