//! Tenant identity for tenant-scoped storage work.
//!
//! Every unit of work that touches tenant data carries a [`TenantContext`].
//! The context is an explicit value passed to the router, never an ambient
//! global, and a missing context is an error rather than a silent fallback
//! to the shared namespace.
//!
//! # Core Types
//!
//! - [`TenantId`] - Opaque tenant identifier
//! - [`TenantContext`] - Immutable per-request tenant identity
//! - [`DeadlineOverride`] - Per-operation replacement for the default deadline
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use shiftbook_persistence::tenant::{TenantContext, TenantId};
//!
//! // Regular request
//! let ctx = TenantContext::new(TenantId::new("acme"));
//!
//! // Long-running administrative work without a deadline
//! let admin = TenantContext::new(TenantId::new("acme")).with_deadline_override(Duration::ZERO);
//! ```

mod context;
mod id;

pub use context::{DeadlineOverride, TenantContext};
pub use id::TenantId;
