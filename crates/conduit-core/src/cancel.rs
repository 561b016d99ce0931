//! Cancellation tokens.
//!
//! A [`CancellationToken`] fires once and stays fired. Tokens form a tree:
//! cancelling a parent cancels every live child with the same reason, while
//! cancelling a child leaves the parent untouched. The server owns a root
//! token per shutdown phase and every request context holds a child of it.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The request deadline elapsed.
    Timeout,
    /// The client went away before the response was produced.
    ConnectionClosed,
    /// The server started a graceful shutdown.
    Shutdown,
    /// The shutdown drain window elapsed and in-flight work is being aborted.
    Forced,
    /// The request finished and its context was released.
    Released,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::Shutdown => "shutdown",
            Self::Forced => "forced",
            Self::Released => "released",
        })
    }
}

struct Inner {
    reason: OnceLock<CancelReason>,
    notify: Notify,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            reason: OnceLock::new(),
            notify: Notify::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn cancel(&self, reason: CancelReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.notify.notify_waiters();

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
        true
    }
}

/// A one-shot, cloneable cancellation signal.
///
/// # Example
///
/// ```rust
/// use conduit_core::{CancelReason, CancellationToken};
///
/// let server = CancellationToken::new();
/// let request = server.child();
///
/// server.cancel(CancelReason::Shutdown);
/// assert!(request.is_cancelled());
/// assert_eq!(request.reason(), Some(CancelReason::Shutdown));
/// ```
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// Creates a root token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new()),
        }
    }

    /// Creates a token that fires when `self` fires.
    ///
    /// A child of an already cancelled token starts cancelled.
    #[must_use]
    pub fn child(&self) -> Self {
        let child = Self::new();
        {
            let mut children = self.inner.children.lock();
            if self.inner.reason.get().is_none() {
                if children.len() == children.capacity() {
                    children.retain(|c| c.strong_count() > 0);
                }
                children.push(Arc::downgrade(&child.inner));
                return child;
            }
        }
        if let Some(reason) = self.reason() {
            child.cancel(reason);
        }
        child
    }

    /// Fires the token. Returns `false` if it had already fired.
    ///
    /// The first reason wins; later calls are no-ops.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.inner.cancel(reason)
    }

    /// Returns `true` once the token has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.reason.get().is_some()
    }

    /// Returns the reason the token fired with.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        self.inner.reason.get().copied()
    }

    /// Completes when the token fires, immediately if it already has.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        assert!(token.cancel(CancelReason::Timeout));
        assert!(!token.cancel(CancelReason::Released));
        assert_eq!(token.reason(), Some(CancelReason::Timeout));
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel(CancelReason::Released);
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_of_cancelled_parent_starts_cancelled() {
        let parent = CancellationToken::new();
        parent.cancel(CancelReason::Forced);
        assert_eq!(parent.child().reason(), Some(CancelReason::Forced));
    }

    #[test]
    fn test_grandchildren_are_cancelled() {
        let root = CancellationToken::new();
        let child = root.child();
        let grandchild = child.child();
        root.cancel(CancelReason::Shutdown);
        assert_eq!(grandchild.reason(), Some(CancelReason::Shutdown));
    }

    #[test]
    fn test_dropped_children_are_pruned() {
        let root = CancellationToken::new();
        for _ in 0..1_000 {
            drop(root.child());
        }
        let live = root.inner.children.lock().len();
        assert!(live < 1_000, "dead children were never pruned: {live}");
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };
        tokio::task::yield_now().await;
        token.cancel(CancelReason::ConnectionClosed);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_immediately_when_fired() {
        let token = CancellationToken::new();
        token.cancel(CancelReason::Timeout);
        token.cancelled().await;
    }
}
