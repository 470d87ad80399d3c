//! Entry point tying the components replicating a single table together.

use std::sync::Arc;
use tailsync_config::shared::SyncConfig;
use tracing::info;

use crate::checkpoint::{Checkpointer, ReleaseMode, ShardCheckpointRegistry};
use crate::clock::Clock;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::conversions::EventConverter;
use crate::engine::SyncEngine;
use crate::error::SyncResult;
use crate::metrics::register_metrics;
use crate::shard::ShardHandler;
use crate::snapshot::SnapshotScanner;
use crate::source::TableSource;
use crate::state::{SyncPhase, SyncState};
use crate::store::OffsetStore;
use crate::stream::{StreamTailClassifier, create_batch_queue};
use crate::types::ChangeEvent;

/// Replicates one table: a full snapshot first, then the changes of the table's change log.
///
/// The task is driven by a single caller through [`SyncTask::poll`] and [`SyncTask::commit`].
/// Change records reach it through the [`ShardHandler`] returned by [`SyncTask::start`], which is
/// handed to the change log coordinator.
#[derive(Debug)]
pub struct SyncTask<T, O, C, K> {
    engine: SyncEngine<T, O, K>,
    registry: ShardCheckpointRegistry,
    handler: ShardHandler<C, K>,
    shutdown_tx: ShutdownTx,
}

impl<T, O, C, K> SyncTask<T, O, C, K>
where
    T: TableSource + Send + Sync,
    O: OffsetStore + Send + Sync,
    C: Checkpointer + Clone + Send + Sync + 'static,
    K: Clock + Clone + Send + Sync + 'static,
{
    /// Starts replicating the table named in `config`.
    ///
    /// The table is described through `source` and its stored offset, if any, is loaded from
    /// `store` to resume where the previous task stopped. Fails if the configuration is invalid
    /// or the stored offset cannot be resumed from.
    pub async fn start(
        config: SyncConfig,
        source: T,
        store: O,
        checkpointer: C,
        clock: K,
    ) -> SyncResult<(Self, ShardHandler<C, K>)> {
        config.validate()?;
        register_metrics();

        let description = source.describe_table(&config.table_name).await?;

        let state = match store.load_offset(&config.table_name).await? {
            Some(offset) => {
                let state = SyncState::from_offset(&offset, &config.table_name)?;
                info!(
                    table = %config.table_name,
                    phase = %state.phase(),
                    rows = state.rows_emitted(),
                    "resuming table replication from stored offset"
                );
                state
            }
            None => {
                info!(table = %config.table_name, "starting table replication with a new snapshot");
                SyncState::new(config.table_name.clone(), clock.now())
            }
        };

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let (sender, receiver) = create_batch_queue(config.stream.queue_capacity);
        let registry = ShardCheckpointRegistry::new(&config.table_name);
        let converter = Arc::new(EventConverter::new(&description, &config.topic_prefix));

        let scanner = SnapshotScanner::new(source, &description, &config.snapshot, converter.clone());
        let classifier = StreamTailClassifier::new(
            receiver,
            registry.clone(),
            converter,
            config.stream.clone(),
            config.table_name.clone(),
        );
        let engine = SyncEngine::new(
            state,
            scanner,
            classifier,
            store,
            clock.clone(),
            config.snapshot.clone(),
            registry.clone(),
            shutdown_rx.clone(),
        );
        let handler = ShardHandler::new(
            &config.table_name,
            registry.clone(),
            sender,
            checkpointer,
            clock,
            config.stream.clone(),
            config.checkpoint.clone(),
            shutdown_rx,
        );

        let task = Self {
            engine,
            registry,
            handler: handler.clone(),
            shutdown_tx,
        };

        Ok((task, handler))
    }

    /// Returns the next events of the table, see [`SyncEngine::poll`].
    pub async fn poll(&mut self) -> SyncResult<Vec<ChangeEvent>> {
        self.engine.poll().await
    }

    /// Records that `event` was delivered downstream, see [`SyncEngine::commit`].
    pub async fn commit(&self, event: &ChangeEvent) -> SyncResult<()> {
        self.engine.commit(event).await
    }

    pub fn state(&self) -> &SyncState {
        self.engine.state()
    }

    pub fn phase(&self) -> SyncPhase {
        self.engine.state().phase()
    }

    pub fn registry(&self) -> &ShardCheckpointRegistry {
        &self.registry
    }

    /// Stops the task.
    ///
    /// Producers stop offering batches, checkpoint timers stop and every shard still registered
    /// is released gracefully, waiting a bounded time for its delivered records to be
    /// committed. Subsequent polls return no events.
    pub async fn stop(&self) -> SyncResult<()> {
        info!(table = %self.engine.state().table_name(), "stopping sync task");

        self.shutdown_tx.shutdown();
        self.handler.release_all(ReleaseMode::Graceful).await
    }
}
