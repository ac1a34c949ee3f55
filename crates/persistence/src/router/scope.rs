//! The derived context of one open transaction.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::core::CancelSignal;
use crate::error::{StorageError, StorageResult, TransactionError};
use crate::schema::Namespace;

/// Why a scope stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeExit {
    Cancelled,
    DeadlineExceeded,
}

/// Deadline and cancellation of one transaction.
///
/// Returned by the router next to the transaction handle. The scope is
/// cancelled when the handle commits, rolls back or is dropped, when its
/// [`CancelHandle`](super::CancelHandle) fires, or when the request it was
/// derived from is cancelled. Work the caller runs outside the handle, such
/// as driver-specific queries through
/// [`TenantTransaction::session`](super::TenantTransaction::session), should
/// be wrapped in [`TransactionScope::guard`] to observe the same limits.
#[derive(Debug, Clone)]
pub struct TransactionScope {
    transaction_id: Uuid,
    namespace: Namespace,
    budget: Option<Duration>,
    deadline: Option<Instant>,
    signal: CancelSignal,
    correlation_id: Option<String>,
}

impl TransactionScope {
    pub(crate) fn new(
        namespace: Namespace,
        budget: Option<Duration>,
        signal: CancelSignal,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            transaction_id: Uuid::new_v4(),
            namespace,
            deadline: budget.map(|b| Instant::now() + b),
            budget,
            signal,
            correlation_id,
        }
    }

    /// Identifier used in logs for this transaction.
    pub fn transaction_id(&self) -> Uuid {
        self.transaction_id
    }

    /// The namespace the transaction is bound to.
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The instant the transaction must finish by, or `None` if disabled.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The time budget the deadline was derived from.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Time left before the deadline, or `None` if disabled.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Returns the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Returns `true` once the scope was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Returns `true` once the scope was cancelled or its deadline passed.
    pub fn is_expired(&self) -> bool {
        self.check().is_some()
    }

    /// Runs `fut` unless the scope expires first.
    ///
    /// Returns `DeadlineExceeded` or `Cancelled` if the scope ends before the
    /// future completes; the future is dropped in that case.
    pub async fn guard<F: Future>(&self, fut: F) -> StorageResult<F::Output> {
        if let Some(exit) = self.check() {
            return Err(self.exit_error(exit));
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            exit = self.expired() => Err(self.exit_error(exit)),
        }
    }

    pub(crate) fn check(&self) -> Option<ScopeExit> {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ScopeExit::DeadlineExceeded)
        } else if self.signal.is_cancelled() {
            Some(ScopeExit::Cancelled)
        } else {
            None
        }
    }

    /// Completes when the scope is cancelled or the deadline passes.
    pub(crate) async fn expired(&self) -> ScopeExit {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.signal.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.signal.cancelled().await,
        }
        self.check().unwrap_or(ScopeExit::Cancelled)
    }

    pub(crate) fn exit_error(&self, exit: ScopeExit) -> StorageError {
        let namespace = self.namespace.name().to_string();
        match exit {
            ScopeExit::DeadlineExceeded => TransactionError::DeadlineExceeded {
                namespace,
                timeout_ms: self.budget.map_or(0, |b| b.as_millis() as u64),
            },
            ScopeExit::Cancelled => TransactionError::Cancelled { namespace },
        }
        .into()
    }

    /// Ends the scope; later guarded work fails with `Cancelled`.
    pub(crate) fn release(&self) {
        self.signal.cancel();
    }
}
