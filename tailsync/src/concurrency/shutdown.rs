use crate::concurrency::signal::{SignalRx, SignalTx, create_signal};

/// Sending half of a shutdown signal.
///
/// The signal is sticky: once sent, every current and future [`ShutdownRx`] observes it.
#[derive(Debug, Clone)]
pub struct ShutdownTx(SignalTx);

impl ShutdownTx {
    pub fn wrap(tx: SignalTx) -> Self {
        Self(tx)
    }

    /// Signals shutdown to every receiver.
    pub fn shutdown(&self) {
        // Replacing the value succeeds even when all receivers are gone.
        self.0.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiving half of a shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(SignalRx);

impl ShutdownRx {
    /// Returns `true` once shutdown was signalled or the sender was dropped.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Waits until shutdown is signalled or the sender is dropped.
    pub async fn wait(&mut self) {
        // An error means the sender is gone, which is treated as a shutdown.
        let _ = self.0.wait_for(|shutdown| *shutdown).await;
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = create_signal();
    (ShutdownTx::wrap(tx), ShutdownRx(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscribers_observe_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        assert!(!rx.is_shutdown());

        tx.shutdown();
        rx.wait().await;

        let late = tx.subscribe();
        assert!(late.is_shutdown());
        assert!(rx.is_shutdown());
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = create_shutdown_channel();
        drop(tx);

        rx.wait().await;
        assert!(rx.is_shutdown());
    }
}
