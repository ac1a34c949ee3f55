//! Hierarchical cancellation signal.
//!
//! A [`CancelSignal`] is a cheap, cloneable flag backed by a watch channel.
//! Child signals observe their parent: cancelling a request cancels every
//! transaction scope derived from it, while cancelling one scope leaves the
//! request and its other scopes untouched.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// A cancellation flag that can be awaited.
///
/// # Examples
///
/// ```
/// use shiftbook_persistence::core::CancelSignal;
///
/// let request = CancelSignal::new();
/// let scope = request.child();
///
/// scope.cancel();
/// assert!(scope.is_cancelled());
/// assert!(!request.is_cancelled());
///
/// let other = request.child();
/// request.cancel();
/// assert!(other.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    cancelled: AtomicBool,
    parent: Option<CancelSignal>,
}

impl CancelSignal {
    /// Creates a root signal.
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelSignal>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                cancelled: AtomicBool::new(false),
                parent,
            }),
        }
    }

    /// Creates a signal that is cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    /// Cancels this signal and every child. Returns `true` for the call
    /// that actually flipped the flag.
    pub fn cancel(&self) -> bool {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.tx.send_replace(true);
            true
        } else {
            false
        }
    }

    /// Returns `true` if this signal or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelSignal::is_cancelled)
    }

    /// Completes once this signal or any ancestor is cancelled.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.inner.tx.subscribe();
            let own = async move {
                while !*rx.borrow_and_update() {
                    if rx.changed().await.is_err() {
                        // Sender lives in `self`; unreachable while borrowed.
                        std::future::pending::<()>().await;
                    }
                }
            };

            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {}
                        _ = parent.cancelled() => {}
                    }
                }
                None => own.await,
            }
        })
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_is_idempotent() {
        let signal = CancelSignal::new();
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let signal = CancelSignal::new();
        let waiter = signal.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        tokio::task::yield_now().await;
        signal.cancel();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_child_observes_parent() {
        let parent = CancelSignal::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), grandchild.cancelled())
            .await
            .unwrap();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_resolves_immediately() {
        let signal = CancelSignal::new();
        signal.cancel();
        tokio::time::timeout(Duration::from_millis(10), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_not_cancelled_by_child() {
        let parent = CancelSignal::new();
        let child = parent.child();
        child.cancel();

        let waited = tokio::time::timeout(Duration::from_millis(50), parent.cancelled()).await;
        assert!(waited.is_err());
    }
}
