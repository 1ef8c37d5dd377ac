//! Cancellation token shared by an executor and every blocking call it makes.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable, one-way cancellation flag.
///
/// `cancel` is the only mutation. Blocking calls `select!` on
/// [`CancelToken::cancelled`] so cancellation is observed inside the call,
/// not only between steps.
#[derive(Debug, Clone)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { state: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Completes once the token has been cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so `wait_for` only returns once
        // the flag is set.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
