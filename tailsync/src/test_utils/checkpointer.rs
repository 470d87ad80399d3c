use std::sync::Arc;
use tokio::sync::Mutex;

use crate::bail;
use crate::checkpoint::Checkpointer;
use crate::error::{ErrorKind, SyncResult};
use crate::types::{SequenceNumber, ShardId};

#[derive(Debug, Default)]
struct Inner {
    checkpoints: Vec<(ShardId, SequenceNumber)>,
    failures: usize,
    attempts: usize,
}

/// [`Checkpointer`] recording every persisted checkpoint.
#[derive(Debug, Clone, Default)]
pub struct RecordingCheckpointer {
    inner: Arc<Mutex<Inner>>,
}

impl RecordingCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` checkpoints fail.
    pub async fn fail_next(&self, count: usize) {
        self.inner.lock().await.failures = count;
    }

    /// Returns the checkpoints persisted so far, in order.
    pub async fn checkpoints(&self) -> Vec<(ShardId, SequenceNumber)> {
        self.inner.lock().await.checkpoints.clone()
    }

    /// Returns the last checkpoint persisted for `shard_id`.
    pub async fn last_checkpoint(&self, shard_id: &ShardId) -> Option<SequenceNumber> {
        self.inner
            .lock()
            .await
            .checkpoints
            .iter()
            .rev()
            .find(|(id, _)| id == shard_id)
            .map(|(_, sequence_number)| sequence_number.clone())
    }

    /// Returns the number of checkpoint attempts, failed ones included.
    pub async fn attempts(&self) -> usize {
        self.inner.lock().await.attempts
    }
}

impl Checkpointer for RecordingCheckpointer {
    async fn persist_checkpoint(
        &self,
        shard_id: &ShardId,
        sequence_number: &SequenceNumber,
    ) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;
        inner.attempts += 1;

        if inner.failures > 0 {
            inner.failures -= 1;
            bail!(
                ErrorKind::CheckpointFailed,
                "Injected checkpoint failure",
                shard_id
            );
        }

        inner
            .checkpoints
            .push((shard_id.clone(), sequence_number.clone()));

        Ok(())
    }
}
