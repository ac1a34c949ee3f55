//! Transaction handles and their cancellation.
//!
//! A [`TenantTransaction`] and its [`CancelHandle`] share one slot holding the
//! pooled session and the terminal state. Whoever reaches the slot first while
//! it is open performs the single commit or rollback; every later call sees
//! the terminal state and does nothing.

use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use uuid::Uuid;

use crate::core::NamespaceSession;
use crate::error::{BackendError, StorageError, StorageResult, TransactionError};
use crate::schema::Namespace;

use super::scope::{ScopeExit, TransactionScope};

/// Why a transaction was rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    /// `rollback` was called.
    Explicit,
    /// The scope, its cancel handle or the parent request was cancelled.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
    /// `commit` failed.
    CommitFailed,
    /// The handle was dropped while still open.
    Dropped,
}

impl fmt::Display for RollbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RollbackReason::Explicit => "rolled back by caller",
            RollbackReason::Cancelled => "cancelled",
            RollbackReason::DeadlineExceeded => "deadline exceeded",
            RollbackReason::CommitFailed => "commit failed",
            RollbackReason::Dropped => "handle dropped without commit",
        };
        write!(f, "{}", reason)
    }
}

impl From<ScopeExit> for RollbackReason {
    fn from(exit: ScopeExit) -> Self {
        match exit {
            ScopeExit::Cancelled => RollbackReason::Cancelled,
            ScopeExit::DeadlineExceeded => RollbackReason::DeadlineExceeded,
        }
    }
}

/// Lifecycle state of a transaction handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Statements may run.
    Open,
    /// Committed; irreversible.
    Committed,
    /// Rolled back for the given reason.
    RolledBack(RollbackReason),
}

pub(crate) struct TxSlot<S> {
    session: Option<S>,
    status: TransactionStatus,
}

impl<S: NamespaceSession> TxSlot<S> {
    pub(crate) fn open(session: S) -> Self {
        Self {
            session: Some(session),
            status: TransactionStatus::Open,
        }
    }

    /// Rolls back if still open and releases the session to the pool.
    async fn terminate(&mut self, reason: RollbackReason) -> Result<bool, BackendError> {
        if self.status != TransactionStatus::Open {
            return Ok(false);
        }
        self.status = TransactionStatus::RolledBack(reason);
        match self.session.take() {
            Some(mut session) => session.rollback().await.map(|_| true),
            None => Ok(true),
        }
    }
}

/// A transaction bound to exactly one namespace.
///
/// The namespace is made active before the handle is returned, and it stays
/// the only namespace unqualified statements can reach until the transaction
/// ends. The handle is committed or rolled back exactly once:
///
/// - `commit` after a successful commit is a no-op returning `Ok`
/// - `rollback` after any terminal state is a no-op returning `Ok`
/// - `commit` after a rollback returns the reason the work was discarded
///   (for example `DeadlineExceeded`) without touching the connection
///
/// Dropping an open handle rolls it back in the background.
pub struct TenantTransaction<S: NamespaceSession> {
    scope: TransactionScope,
    slot: Arc<Mutex<TxSlot<S>>>,
}

impl<S: NamespaceSession> fmt::Debug for TenantTransaction<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantTransaction")
            .field("transaction_id", &self.scope.transaction_id())
            .field("namespace", self.scope.namespace())
            .finish_non_exhaustive()
    }
}

impl<S: NamespaceSession> TenantTransaction<S> {
    pub(crate) fn new(scope: TransactionScope, slot: Arc<Mutex<TxSlot<S>>>) -> Self {
        Self { scope, slot }
    }

    /// Identifier used in logs for this transaction.
    pub fn id(&self) -> Uuid {
        self.scope.transaction_id()
    }

    /// The namespace this transaction is bound to.
    pub fn namespace(&self) -> &Namespace {
        self.scope.namespace()
    }

    /// The scope carrying this transaction's deadline and cancellation.
    pub fn scope(&self) -> &TransactionScope {
        &self.scope
    }

    /// Current lifecycle state.
    pub async fn status(&self) -> TransactionStatus {
        self.slot.lock().await.status
    }

    /// Runs one statement and returns the number of affected rows.
    ///
    /// If the deadline passes or the scope is cancelled while the statement
    /// runs, the statement is abandoned, the transaction is rolled back and
    /// `DeadlineExceeded` or `Cancelled` is returned. A statement rejected by
    /// the database is returned annotated with the namespace; the transaction
    /// then stays open until the caller rolls it back or cancels it.
    pub async fn execute(&self, sql: &str) -> StorageResult<u64> {
        let mut slot = self.slot.lock().await;
        let session = self.usable_session(&mut slot).await?;
        let outcome = self.scope.guard(session.execute(sql)).await;
        self.settle(&mut slot, outcome).await
    }

    /// Runs a script of one or more statements verbatim.
    ///
    /// Same deadline and error behavior as [`TenantTransaction::execute`].
    pub async fn batch_execute(&self, sql: &str) -> StorageResult<()> {
        let mut slot = self.slot.lock().await;
        let session = self.usable_session(&mut slot).await?;
        let outcome = self.scope.guard(session.batch_execute(sql)).await;
        self.settle(&mut slot, outcome).await
    }

    /// Exclusive access to the underlying session for driver-specific work.
    ///
    /// The watchdog cannot roll the transaction back while the guard is
    /// held, so long-running work should go through [`TransactionScope::guard`].
    pub async fn session(&self) -> StorageResult<MappedMutexGuard<'_, S>> {
        let mut slot = self.slot.lock().await;
        self.usable_session(&mut slot).await?;
        MutexGuard::try_map(slot, |slot| slot.session.as_mut())
            .map_err(|_| self.invalid_error())
    }

    /// Commits the transaction.
    ///
    /// The commit itself is not interrupted by the deadline; once it is sent
    /// the outcome is the database's. A failed commit leaves the transaction
    /// rolled back.
    pub async fn commit(&self) -> StorageResult<()> {
        let mut slot = self.slot.lock().await;
        match slot.status {
            TransactionStatus::Committed => return Ok(()),
            TransactionStatus::RolledBack(reason) => return Err(self.rolled_back_error(reason)),
            TransactionStatus::Open => {}
        }
        if let Some(exit) = self.scope.check() {
            self.terminate(&mut slot, exit.into()).await;
            return Err(self.scope.exit_error(exit));
        }

        let Some(mut session) = slot.session.take() else {
            slot.status = TransactionStatus::RolledBack(RollbackReason::CommitFailed);
            return Err(self.invalid_error());
        };

        let result = session.commit().await;
        match result {
            Ok(()) => {
                slot.status = TransactionStatus::Committed;
                drop(session);
                self.scope.release();
                tracing::debug!(
                    transaction_id = %self.id(),
                    namespace = %self.namespace(),
                    "Transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                slot.status = TransactionStatus::RolledBack(RollbackReason::CommitFailed);
                if session.in_transaction() {
                    if let Err(rollback_err) = session.rollback().await {
                        tracing::warn!(
                            transaction_id = %self.id(),
                            namespace = %self.namespace(),
                            error = %rollback_err,
                            "Rollback after failed commit failed"
                        );
                    }
                }
                drop(session);
                self.scope.release();
                Err(StorageError::in_namespace(self.namespace().name(), e))
            }
        }
    }

    /// Rolls the transaction back. A no-op once the transaction has ended.
    pub async fn rollback(&self) -> StorageResult<()> {
        let mut slot = self.slot.lock().await;
        let result = slot.terminate(RollbackReason::Explicit).await;
        self.scope.release();
        result
            .map(|_| ())
            .map_err(|e| StorageError::in_namespace(self.namespace().name(), e))
    }

    async fn usable_session<'a>(&self, slot: &'a mut TxSlot<S>) -> StorageResult<&'a mut S> {
        match slot.status {
            TransactionStatus::Open => {}
            TransactionStatus::Committed => return Err(self.invalid_error()),
            TransactionStatus::RolledBack(reason) => return Err(self.rolled_back_error(reason)),
        }
        if let Some(exit) = self.scope.check() {
            self.terminate(slot, exit.into()).await;
            return Err(self.scope.exit_error(exit));
        }
        slot.session.as_mut().ok_or_else(|| self.invalid_error())
    }

    async fn settle<T>(
        &self,
        slot: &mut TxSlot<S>,
        outcome: StorageResult<Result<T, BackendError>>,
    ) -> StorageResult<T> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => match self.scope.check() {
                // The database's own statement timeout can fire just before the scope's.
                Some(exit) => {
                    self.terminate(slot, exit.into()).await;
                    Err(self.scope.exit_error(exit))
                }
                None => Err(StorageError::in_namespace(self.namespace().name(), e)),
            },
            Err(scope_err) => {
                let reason = match scope_err.kind() {
                    crate::error::ErrorKind::DeadlineExceeded => RollbackReason::DeadlineExceeded,
                    _ => RollbackReason::Cancelled,
                };
                self.terminate(slot, reason).await;
                Err(scope_err)
            }
        }
    }

    async fn terminate(&self, slot: &mut TxSlot<S>, reason: RollbackReason) {
        terminate_logged(slot, reason, &self.scope).await;
        self.scope.release();
    }

    fn invalid_error(&self) -> StorageError {
        TransactionError::InvalidTransaction {
            namespace: self.namespace().name().to_string(),
        }
        .into()
    }

    fn rolled_back_error(&self, reason: RollbackReason) -> StorageError {
        match reason {
            RollbackReason::DeadlineExceeded => self.scope.exit_error(ScopeExit::DeadlineExceeded),
            RollbackReason::Cancelled => self.scope.exit_error(ScopeExit::Cancelled),
            other => TransactionError::RolledBack {
                namespace: self.namespace().name().to_string(),
                reason: other.to_string(),
            }
            .into(),
        }
    }
}

impl<S: NamespaceSession> Drop for TenantTransaction<S> {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.try_lock() {
            if slot.status == TransactionStatus::Open {
                slot.status = TransactionStatus::RolledBack(RollbackReason::Dropped);
                if let Some(session) = slot.session.take() {
                    tracing::warn!(
                        transaction_id = %self.id(),
                        namespace = %self.namespace(),
                        "Transaction dropped without commit or rollback; rolling back"
                    );
                    spawn_rollback(session, self.namespace().clone());
                }
            }
        }
        self.scope.release();
    }
}

/// Cancels one transaction.
///
/// `cancel` must always be called (or the handle dropped) once the caller is
/// done. It is idempotent: after a commit it does nothing, before a commit it
/// cancels the scope and rolls the transaction back.
pub struct CancelHandle<S: NamespaceSession> {
    slot: Weak<Mutex<TxSlot<S>>>,
    scope: TransactionScope,
}

impl<S: NamespaceSession> fmt::Debug for CancelHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("transaction_id", &self.scope.transaction_id())
            .field("cancelled", &self.scope.is_cancelled())
            .finish()
    }
}

impl<S: NamespaceSession> CancelHandle<S> {
    pub(crate) fn new(slot: Weak<Mutex<TxSlot<S>>>, scope: TransactionScope) -> Self {
        Self { slot, scope }
    }

    /// Cancels the scope and rolls back the transaction if it is still open.
    ///
    /// The scope is cancelled first, so a statement running on another task
    /// is interrupted instead of being waited for.
    pub async fn cancel(&self) -> StorageResult<()> {
        self.scope.release();
        let Some(slot) = self.slot.upgrade() else {
            return Ok(());
        };
        let mut slot = slot.lock().await;
        slot.terminate(RollbackReason::Cancelled)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::in_namespace(self.scope.namespace().name(), e))
    }
}

impl<S: NamespaceSession> Drop for CancelHandle<S> {
    fn drop(&mut self) {
        // The watchdog performs the rollback once the scope is cancelled.
        self.scope.release();
    }
}

/// Rolls the transaction back as soon as its scope expires.
pub(crate) async fn watch_scope<S: NamespaceSession>(
    slot: Weak<Mutex<TxSlot<S>>>,
    scope: TransactionScope,
) {
    let exit = scope.expired().await;
    scope.release();
    let Some(slot) = slot.upgrade() else {
        return;
    };
    let mut slot = slot.lock().await;
    terminate_logged(&mut slot, exit.into(), &scope).await;
}

async fn terminate_logged<S: NamespaceSession>(
    slot: &mut TxSlot<S>,
    reason: RollbackReason,
    scope: &TransactionScope,
) {
    match slot.terminate(reason).await {
        Ok(true) => tracing::debug!(
            transaction_id = %scope.transaction_id(),
            namespace = %scope.namespace(),
            %reason,
            "Transaction rolled back"
        ),
        Ok(false) => {}
        Err(e) => tracing::warn!(
            transaction_id = %scope.transaction_id(),
            namespace = %scope.namespace(),
            %reason,
            error = %e,
            "Rollback failed"
        ),
    }
}

fn spawn_rollback<S: NamespaceSession>(mut session: S, namespace: Namespace) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = session.rollback().await {
                    tracing::warn!(namespace = %namespace, error = %e, "Background rollback failed");
                }
            });
        }
        // Without a runtime the session is dropped mid-transaction and the
        // backend discards the connection.
        Err(_) => drop(session),
    }
}
