//! Core backend traits and primitives.
//!
//! - [`NamespaceBackend`] - Pooled database driver abstraction
//! - [`NamespaceSession`] - One pooled connection able to bind a namespace
//! - [`CancelSignal`] - Hierarchical cancellation shared by requests and transaction scopes
//!
//! The router in [`crate::router`] is written against these traits only, so
//! the same transaction lifecycle runs on PostgreSQL and on the in-memory
//! backend used by the test suite.

mod backend;
mod cancel;

pub use backend::{BackendKind, BindScope, NamespaceBackend, NamespaceSession, PoolStatus};
pub use cancel::CancelSignal;
