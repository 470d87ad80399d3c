use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::ChangeRecordBatch;

/// Outcome of [`BatchSender::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Shutdown was requested while the queue was full, the batch was dropped.
    Abandoned,
}

/// Creates the bounded queue connecting the shard producers to the poll path.
pub fn create_batch_queue(capacity: usize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BatchSender { tx }, BatchReceiver { rx })
}

/// Producer half of the batch queue, one clone per shard.
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<ChangeRecordBatch>,
}

impl BatchSender {
    /// Offers `batch` to the queue until it is accepted.
    ///
    /// Each attempt waits at most `offer_timeout`. `should_stop` is checked before every attempt,
    /// when it returns `true` the batch is abandoned.
    pub async fn deliver<F>(
        &self,
        mut batch: ChangeRecordBatch,
        offer_timeout: Duration,
        should_stop: F,
    ) -> SyncResult<Delivery>
    where
        F: Fn() -> bool,
    {
        loop {
            if should_stop() {
                debug!(shard_id = %batch.shard_id, records = batch.records.len(), "abandoning batch on shutdown");
                return Ok(Delivery::Abandoned);
            }

            match self.tx.send_timeout(batch, offer_timeout).await {
                Ok(()) => return Ok(Delivery::Delivered),
                Err(SendTimeoutError::Timeout(returned)) => batch = returned,
                Err(SendTimeoutError::Closed(_)) => {
                    bail!(
                        ErrorKind::QueueClosed,
                        "The batch queue was closed by its consumer"
                    );
                }
            }
        }
    }
}

/// Consumer half of the batch queue, owned by the poll path.
#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::Receiver<ChangeRecordBatch>,
}

impl BatchReceiver {
    /// Waits at most `timeout` for the next batch.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<ChangeRecordBatch> {
        tokio::time::timeout(timeout, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::types::ShardId;

    fn batch(shard: &str) -> ChangeRecordBatch {
        ChangeRecordBatch {
            shard_id: ShardId::new(shard),
            records: vec![],
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (tx, mut rx) = create_batch_queue(2);

        for shard in ["a", "b"] {
            let delivery = tx
                .deliver(batch(shard), Duration::from_millis(10), || false)
                .await
                .unwrap();
            assert_eq!(delivery, Delivery::Delivered);
        }

        let timeout = Duration::from_millis(10);
        assert_eq!(rx.recv_timeout(timeout).await, Some(batch("a")));
        assert_eq!(rx.recv_timeout(timeout).await, Some(batch("b")));
        assert_eq!(rx.recv_timeout(timeout).await, None);
    }

    #[tokio::test]
    async fn full_queue_retries_until_stopped() {
        let (tx, _rx) = create_batch_queue(1);
        tx.deliver(batch("a"), Duration::from_millis(5), || false)
            .await
            .unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn({
            let tx = tx.clone();
            let stop = stop.clone();
            async move {
                tx.deliver(batch("b"), Duration::from_millis(5), || {
                    stop.load(Ordering::SeqCst)
                })
                .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        stop.store(true, Ordering::SeqCst);
        assert_eq!(task.await.unwrap().unwrap(), Delivery::Abandoned);
    }

    #[tokio::test]
    async fn closed_queue_fails_delivery() {
        let (tx, rx) = create_batch_queue(1);
        drop(rx);

        let err = tx
            .deliver(batch("a"), Duration::from_millis(5), || false)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueueClosed);
    }
}
