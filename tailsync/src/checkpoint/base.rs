use std::future::Future;

use crate::error::SyncResult;
use crate::types::{SequenceNumber, ShardId};

/// Checkpoint primitive of the shard lease coordinator.
///
/// Persisting a checkpoint tells the coordinator that every record of the shard up to
/// `sequence_number` was delivered downstream, so that a new lease owner resumes after it.
/// Implementations must be idempotent and may fail, failures are retried by the caller.
pub trait Checkpointer {
    fn persist_checkpoint(
        &self,
        shard_id: &ShardId,
        sequence_number: &SequenceNumber,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}
