//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is shared between the host and one extraction
//! request. While the request waits for admission, cancelling it removes
//! the request from the gate queue without touching any native resource.
//! Once admitted, the pipeline checks the token between steps and unwinds
//! with [`ThumbnailError::Cancelled`](crate::ThumbnailError::Cancelled),
//! releasing everything it opened.
//!
//! # Example
//!
//! ```
//! use stillframe::CancellationToken;
//!
//! let token = CancellationToken::new();
//! assert!(!token.is_cancelled());
//!
//! // From another thread or task:
//! token.cancel();
//! assert!(token.is_cancelled());
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::Notify;

use crate::error::ThumbnailError;

#[derive(Debug, Default)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation token.
///
/// Clones share state; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    state: Arc<TokenState>,
}

impl CancellationToken {
    /// Create a new, non-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every task waiting in
    /// [`cancelled`](CancellationToken::cancelled).
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.notify.notify_waiters();
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        let notified = self.state.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `cancel` cannot slip between them.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }

    /// Return [`ThumbnailError::Cancelled`] if cancellation was requested.
    pub(crate) fn check(&self) -> Result<(), ThumbnailError> {
        if self.is_cancelled() {
            Err(ThumbnailError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Cancels its token when dropped, unless disarmed.
///
/// Held by an in-flight extraction future so that dropping the future stops
/// the blocking pipeline at its next step boundary.
pub(crate) struct CancelOnDrop {
    token: Option<CancellationToken>,
}

impl CancelOnDrop {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token: Some(token) }
    }

    pub(crate) fn disarm(mut self) {
        self.token = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelled_wakes_waiter() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter was not woken")
            .expect("waiter panicked");
    }

    #[tokio::test]
    async fn cancelled_returns_immediately_when_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("should not wait");
        assert!(matches!(token.check(), Err(ThumbnailError::Cancelled)));
    }

    #[test]
    fn guard_cancels_unless_disarmed() {
        let token = CancellationToken::new();
        CancelOnDrop::new(token.clone()).disarm();
        assert!(!token.is_cancelled());
        drop(CancelOnDrop::new(token.clone()));
        assert!(token.is_cancelled());
    }
}
