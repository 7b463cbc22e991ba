//! Shutdown signalling
//!
//! Latched: waiters created after the trigger resolve immediately.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Shared shutdown flag
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Trigger shutdown
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolve once shutdown has been triggered
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.sender.subscribe();
        async move {
            // A dropped signal can no longer fire.
            if receiver.wait_for(|triggered| *triggered).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_wakes_waiter() {
        let signal = ShutdownSignal::new();
        let waiter = tokio::spawn(signal.wait());

        assert!(!signal.is_shutdown());
        signal.shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_waiter_resolves() {
        let signal = ShutdownSignal::new();
        signal.shutdown();
        tokio::time::timeout(Duration::from_secs(1), signal.wait())
            .await
            .unwrap();
    }
}
