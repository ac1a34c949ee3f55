//! Request-scoped context carrying tenant identity, deadline override and cancellation.

use std::time::Duration;

use crate::core::CancelSignal;
use crate::error::{StorageResult, TenantError};
use crate::tenant::{DeadlineOverride, TenantContext};

/// The context a unit of work hands to the router.
///
/// The tenant slot is the one well-known place tenant identity is read from.
/// A context without a tenant is valid for shared-namespace work; opening a
/// tenant transaction from it fails with `InvalidTenant`.
///
/// Deadline precedence when a transaction is opened: the request-level
/// override set with [`RequestContext::with_deadline_override`], then the
/// tenant's own override, then the router default.
///
/// Derived contexts share the cancellation signal of the context they were
/// derived from: cancelling either cancels the whole request.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shiftbook_persistence::router::RequestContext;
/// use shiftbook_persistence::tenant::{DeadlineOverride, TenantContext};
///
/// let ctx = RequestContext::for_tenant(TenantContext::new("acme"));
/// let admin = ctx.with_deadline_override(Duration::ZERO);
///
/// assert_eq!(ctx.deadline_override(), DeadlineOverride::Inherit);
/// assert_eq!(admin.deadline_override(), DeadlineOverride::Disabled);
/// assert_eq!(admin.effective_deadline(Duration::from_secs(30)), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    tenant: Option<TenantContext>,
    deadline_override: DeadlineOverride,
    signal: CancelSignal,
    correlation_id: Option<String>,
}

impl RequestContext {
    /// Creates a context with no tenant attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context for the given tenant.
    pub fn for_tenant(tenant: TenantContext) -> Self {
        Self {
            correlation_id: tenant.correlation_id().map(str::to_string),
            tenant: Some(tenant),
            ..Self::default()
        }
    }

    /// Returns a derived context with the tenant slot set.
    pub fn with_tenant(&self, tenant: TenantContext) -> Self {
        let mut derived = self.clone();
        if derived.correlation_id.is_none() {
            derived.correlation_id = tenant.correlation_id().map(str::to_string);
        }
        derived.tenant = Some(tenant);
        derived
    }

    /// Returns a derived context carrying a deadline override.
    ///
    /// A zero duration disables the deadline, which is distinct from not
    /// setting an override at all.
    pub fn with_deadline_override(&self, duration: Duration) -> Self {
        let mut derived = self.clone();
        derived.deadline_override = DeadlineOverride::from_duration(duration);
        derived
    }

    /// Returns a derived context with the deadline disabled.
    pub fn without_deadline(&self) -> Self {
        let mut derived = self.clone();
        derived.deadline_override = DeadlineOverride::Disabled;
        derived
    }

    /// Returns a derived context with the given correlation ID.
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        let mut derived = self.clone();
        derived.correlation_id = Some(correlation_id.into());
        derived
    }

    /// Returns the tenant, or `InvalidTenant` if none is attached.
    pub fn tenant(&self) -> StorageResult<&TenantContext> {
        self.tenant
            .as_ref()
            .ok_or_else(|| TenantError::MissingContext.into())
    }

    /// Returns the tenant if one is attached.
    pub fn tenant_context(&self) -> Option<&TenantContext> {
        self.tenant.as_ref()
    }

    /// Returns the request-level deadline override.
    pub fn deadline_override(&self) -> DeadlineOverride {
        self.deadline_override
    }

    /// The time budget a transaction opened from this context gets, or
    /// `None` when the deadline is disabled.
    pub fn effective_deadline(&self, default: Duration) -> Option<Duration> {
        let tenant_override = self
            .tenant
            .as_ref()
            .map(TenantContext::deadline_override)
            .unwrap_or_default();
        self.deadline_override
            .or(tenant_override)
            .effective(default)
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Cancels the request and every transaction scope derived from it.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    /// Returns `true` once the request was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// The request's cancellation signal.
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }
}
