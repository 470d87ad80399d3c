use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tailsync_config::shared::{CheckpointConfig, StreamConfig};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::bail;
use crate::checkpoint::{CheckpointOutcome, Checkpointer, ReleaseMode, ShardCheckpointRegistry};
use crate::clock::Clock;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::shard::ShardLifecycle;
use crate::stream::{BatchSender, Delivery};
use crate::types::{ChangeRecord, ChangeRecordBatch, ShardId};

#[derive(Debug)]
struct ShardWorker {
    shutdown_tx: ShutdownTx,
    timer: JoinHandle<()>,
}

/// [`ShardLifecycle`] implementation feeding the batch queue of a sync task.
///
/// Every initialized shard gets a checkpoint timer task which periodically persists the
/// progress committed through the task.
#[derive(Debug, Clone)]
pub struct ShardHandler<C, K> {
    table_name: Arc<str>,
    registry: ShardCheckpointRegistry,
    sender: BatchSender,
    checkpointer: C,
    clock: K,
    stream_config: StreamConfig,
    checkpoint_config: CheckpointConfig,
    shutdown_rx: ShutdownRx,
    workers: Arc<Mutex<HashMap<ShardId, ShardWorker>>>,
}

impl<C, K> ShardHandler<C, K>
where
    C: Checkpointer + Clone + Send + Sync + 'static,
    K: Clock + Clone + Send + Sync + 'static,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        table_name: &str,
        registry: ShardCheckpointRegistry,
        sender: BatchSender,
        checkpointer: C,
        clock: K,
        stream_config: StreamConfig,
        checkpoint_config: CheckpointConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            table_name: Arc::from(table_name),
            registry,
            sender,
            checkpointer,
            clock,
            stream_config,
            checkpoint_config,
            shutdown_rx,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Releases every registered shard in `mode`, concurrently.
    ///
    /// Failures of individual shards are aggregated, every shard is released regardless.
    pub async fn release_all(&self, mode: ReleaseMode) -> SyncResult<()> {
        let shard_ids = self.registry.shard_ids().await;
        info!(table = %self.table_name, shards = shard_ids.len(), ?mode, "releasing all shards");

        let mut join_set = JoinSet::new();
        for shard_id in shard_ids {
            let handler = self.clone();
            join_set.spawn(async move { handler.on_shutdown(shard_id, mode).await });
        }

        let mut errors: Vec<SyncError> = vec![];
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => errors.push(err),
                Err(err) => {
                    error!(table = %self.table_name, error = %err, "shard release task failed");
                    errors.push(crate::sync_error!(
                        ErrorKind::Unknown,
                        "Shard release task failed",
                        err
                    ));
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        Ok(())
    }

    async fn shard_shutdown_rx(&self, shard_id: &ShardId) -> Option<ShutdownRx> {
        self.workers
            .lock()
            .await
            .get(shard_id)
            .map(|worker| worker.shutdown_tx.subscribe())
    }
}

impl<C, K> ShardLifecycle for ShardHandler<C, K>
where
    C: Checkpointer + Clone + Send + Sync + 'static,
    K: Clock + Clone + Send + Sync + 'static,
{
    async fn on_shard_init(&self, shard_id: ShardId) -> SyncResult<()> {
        if self.shutdown_rx.is_shutdown() {
            bail!(
                ErrorKind::InvalidState,
                "Shards cannot be initialized after shutdown",
                shard_id
            );
        }

        // The worker map is locked for the whole registration so that a concurrent init of the
        // same shard cannot spawn a second timer.
        let mut workers = self.workers.lock().await;
        if !self
            .registry
            .register_shard(shard_id.clone(), self.clock.now_millis())
            .await
        {
            debug!(table = %self.table_name, %shard_id, "shard was already initialized");
            return Ok(());
        }

        let (shutdown_tx, shard_shutdown_rx) = create_shutdown_channel();
        let span = tracing::info_span!("shard_checkpoint_timer", shard_id = %shard_id);
        let timer = tokio::spawn(
            run_checkpoint_timer(
                self.registry.clone(),
                shard_id.clone(),
                self.checkpointer.clone(),
                self.clock.clone(),
                self.checkpoint_config.interval(),
                self.shutdown_rx.clone(),
                shard_shutdown_rx,
            )
            .instrument(span),
        );

        workers.insert(shard_id, ShardWorker { shutdown_tx, timer });

        Ok(())
    }

    async fn on_batch(&self, shard_id: ShardId, records: Vec<ChangeRecord>) -> SyncResult<()> {
        let Some(shard_shutdown_rx) = self.shard_shutdown_rx(&shard_id).await else {
            bail!(
                ErrorKind::UnknownShard,
                "Records were delivered for a shard that is not initialized",
                shard_id
            );
        };

        let Some(last_sequence_number) = records.last().map(|record| record.sequence_number.clone())
        else {
            return Ok(());
        };

        let batch = ChangeRecordBatch {
            shard_id: shard_id.clone(),
            records,
        };
        let task_shutdown_rx = self.shutdown_rx.clone();
        let delivery = self
            .sender
            .deliver(batch, self.stream_config.queue_offer_timeout(), || {
                task_shutdown_rx.is_shutdown() || shard_shutdown_rx.is_shutdown()
            })
            .await?;

        if delivery == Delivery::Abandoned {
            return Ok(());
        }

        self.registry
            .record_delivered(&shard_id, &last_sequence_number)
            .await;
        self.registry
            .checkpoint_if_due(
                &shard_id,
                self.clock.now_millis(),
                self.checkpoint_config.interval(),
                &self.checkpointer,
            )
            .await;

        Ok(())
    }

    async fn on_shutdown(&self, shard_id: ShardId, mode: ReleaseMode) -> SyncResult<()> {
        let worker = self.workers.lock().await.remove(&shard_id);
        if let Some(worker) = worker {
            worker.shutdown_tx.shutdown();
            if let Err(err) = worker.timer.await {
                warn!(table = %self.table_name, %shard_id, error = %err, "checkpoint timer of shard failed");
            }
        }

        let released = self
            .registry
            .release_shard(
                &shard_id,
                mode,
                &self.checkpointer,
                self.checkpoint_config.release_poll_interval(),
                self.checkpoint_config.release_max_wait(),
            )
            .await;

        if !released {
            debug!(table = %self.table_name, %shard_id, "shutdown requested for a shard that is not registered");
        }

        Ok(())
    }
}

async fn run_checkpoint_timer<C, K>(
    registry: ShardCheckpointRegistry,
    shard_id: ShardId,
    checkpointer: C,
    clock: K,
    interval: Duration,
    mut task_shutdown_rx: ShutdownRx,
    mut shard_shutdown_rx: ShutdownRx,
) where
    C: Checkpointer + Sync,
    K: Clock,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = task_shutdown_rx.wait() => break,
            _ = shard_shutdown_rx.wait() => break,
            _ = ticker.tick() => {
                let outcome = registry
                    .checkpoint_if_due(&shard_id, clock.now_millis(), interval, &checkpointer)
                    .await;

                if outcome == CheckpointOutcome::UnknownShard {
                    break;
                }
            }
        }
    }

    debug!(%shard_id, "checkpoint timer stopped");
}
