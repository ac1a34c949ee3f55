//! Tenant context and deadline overrides.
//!
//! A [`TenantContext`] is built once per inbound request (or once per
//! administrative operation) and never changes afterwards. Deriving a variant,
//! for example with a different deadline, produces a new value.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::id::TenantId;

/// Replacement for the router's default transaction time budget.
///
/// `Disabled` is an explicit state, not a very large timeout: a transaction
/// opened with it has no deadline at all. `Inherit` means no override was
/// given and the next level of configuration decides.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shiftbook_persistence::tenant::DeadlineOverride;
///
/// assert_eq!(DeadlineOverride::from_duration(Duration::ZERO), DeadlineOverride::Disabled);
///
/// let five = DeadlineOverride::from_duration(Duration::from_secs(5));
/// assert_eq!(five.effective(Duration::from_secs(30)), Some(Duration::from_secs(5)));
/// assert_eq!(DeadlineOverride::Inherit.effective(Duration::from_secs(30)), Some(Duration::from_secs(30)));
/// assert_eq!(DeadlineOverride::Disabled.effective(Duration::from_secs(30)), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadlineOverride {
    /// No override; use the next configured value.
    #[default]
    Inherit,
    /// No deadline is enforced.
    Disabled,
    /// The transaction must finish within this duration.
    After(Duration),
}

impl DeadlineOverride {
    /// Converts a caller-supplied duration; zero means "disabled".
    pub fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            DeadlineOverride::Disabled
        } else {
            DeadlineOverride::After(duration)
        }
    }

    /// Returns `true` unless this is [`DeadlineOverride::Inherit`].
    pub fn is_set(&self) -> bool {
        !matches!(self, DeadlineOverride::Inherit)
    }

    /// Returns `self` if set, otherwise `fallback`.
    pub fn or(self, fallback: DeadlineOverride) -> DeadlineOverride {
        match self {
            DeadlineOverride::Inherit => fallback,
            other => other,
        }
    }

    /// The time budget after applying the process-wide default, or `None`
    /// when no deadline applies.
    pub fn effective(self, default: Duration) -> Option<Duration> {
        match self {
            DeadlineOverride::Inherit => Some(default),
            DeadlineOverride::Disabled => None,
            DeadlineOverride::After(duration) => Some(duration),
        }
    }
}

/// Immutable tenant identity for one unit of work.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use shiftbook_persistence::tenant::{DeadlineOverride, TenantContext, TenantId};
///
/// let ctx = TenantContext::new(TenantId::new("acme"))
///     .with_deadline_override(Duration::from_secs(2))
///     .with_correlation_id("req-42");
///
/// assert_eq!(ctx.tenant_id().as_str(), "acme");
/// assert_eq!(ctx.deadline_override(), DeadlineOverride::After(Duration::from_secs(2)));
/// assert_eq!(ctx.correlation_id(), Some("req-42"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    deadline_override: DeadlineOverride,
    correlation_id: Option<String>,
}

impl TenantContext {
    /// Creates a context for the given tenant with no deadline override.
    pub fn new(tenant_id: impl Into<TenantId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            deadline_override: DeadlineOverride::Inherit,
            correlation_id: None,
        }
    }

    /// Returns a copy carrying the given deadline override; zero disables the deadline.
    pub fn with_deadline_override(mut self, duration: Duration) -> Self {
        self.deadline_override = DeadlineOverride::from_duration(duration);
        self
    }

    /// Returns a copy with the deadline explicitly disabled.
    pub fn without_deadline(mut self) -> Self {
        self.deadline_override = DeadlineOverride::Disabled;
        self
    }

    /// Creates a context with the specified correlation ID for tracing.
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Returns the tenant ID.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the deadline override.
    pub fn deadline_override(&self) -> DeadlineOverride {
        self.deadline_override
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}
