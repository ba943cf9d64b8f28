//! Cooperative cancellation for synthesis runs
//!
//! Workers check the token before starting a fragment and the merge loop
//! checks it before applying each fragment. While the merge loop is idle it
//! waits on `cancelled()` alongside the workers, so a cancel is noticed
//! without waiting for the next worker to finish. Merges already applied
//! stay applied and are saved at run end.

use std::sync::Arc;
use tokio::sync::watch;

/// A cloneable cancel flag that can also be awaited.
///
/// Cancelling is one-way: once set the token stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// Request cancellation. Safe to call more than once, from any thread.
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn clones_share_one_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_cancel_from_another_task() {
        let token = CancellationToken::new();
        let remote = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            remote.cancel();
        });

        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("cancel should wake the waiter");
    }

    #[tokio::test]
    async fn cancelled_returns_at_once_when_already_set() {
        let token = CancellationToken::new();
        token.cancel();
        token.cancelled().await;
    }
}
