//! A simple single-trigger, wake-all condition.
//!
//! Used directly by the blob store as the in-process half of its rendezvous protocol: all
//! same-process waiters on a generation key share one `AsyncLatch` and are released the instant
//! the producer triggers it, with no polling.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

/// An AsyncLatch is a simple condition that can be triggered once to release any threads that are
/// waiting for it.
///
/// Should be roughly equivalent to Java's CountDownLatch with a count of 1, or Python's Event
/// type, without the ability to "clear" the condition once it has been triggered.
#[derive(Clone)]
pub struct AsyncLatch {
    sender: Arc<Mutex<Option<watch::Sender<()>>>>,
    receiver: watch::Receiver<()>,
}

impl AsyncLatch {
    pub fn new() -> AsyncLatch {
        let (sender, receiver) = watch::channel(());
        AsyncLatch {
            sender: Arc::new(Mutex::new(Some(sender))),
            receiver,
        }
    }

    /// Mark this latch triggered, releasing all threads that are waiting for it to trigger.
    ///
    /// All calls to trigger after the first one are noops.
    pub fn trigger(&self) {
        // To trigger the latch, we drop the Sender.
        self.sender.lock().take();
    }

    /// Wait for another thread to trigger this latch.
    pub async fn triggered(&self) {
        let mut receiver = self.receiver.clone();
        while receiver.changed().await.is_ok() {}
    }

    /// Return true if the latch has been triggered.
    pub fn poll_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}

impl Default for AsyncLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::AsyncLatch;

    #[tokio::test]
    async fn trigger_releases_waiters() {
        let latch = AsyncLatch::new();
        assert!(!latch.poll_triggered());

        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move {
                latch.triggered().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should have woken up")
            .unwrap();
        assert!(latch.poll_triggered());
    }

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let latch = AsyncLatch::new();
        latch.trigger();
        latch.trigger();
        latch.triggered().await;
    }

    #[tokio::test]
    async fn already_triggered_returns_immediately() {
        let latch = AsyncLatch::new();
        latch.trigger();
        tokio::time::timeout(Duration::from_millis(50), latch.triggered())
            .await
            .expect("should not block");
    }
}
