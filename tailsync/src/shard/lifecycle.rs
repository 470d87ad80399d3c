use std::future::Future;

use crate::checkpoint::ReleaseMode;
use crate::error::SyncResult;
use crate::types::{ChangeRecord, ShardId};

/// Callbacks through which the change log coordinator hands shards to the process.
///
/// The coordinator owns shard leases. It calls [`ShardLifecycle::on_shard_init`] when a lease is
/// acquired, [`ShardLifecycle::on_batch`] for every batch of records read from the shard, in
/// order, and [`ShardLifecycle::on_shutdown`] when the lease ends.
pub trait ShardLifecycle {
    /// Starts tracking a shard whose lease was acquired.
    fn on_shard_init(&self, shard_id: ShardId) -> impl Future<Output = SyncResult<()>> + Send;

    /// Hands the next records of a shard to the process.
    ///
    /// Returns once the records were queued, or dropped because shutdown was requested.
    fn on_batch(
        &self,
        shard_id: ShardId,
        records: Vec<ChangeRecord>,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Stops tracking a shard whose lease ended.
    fn on_shutdown(
        &self,
        shard_id: ShardId,
        mode: ReleaseMode,
    ) -> impl Future<Output = SyncResult<()>> + Send;
}
