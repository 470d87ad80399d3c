//! Sync state machine deciding, on every poll, whether the table is snapshotted or tailed.

use chrono::{DateTime, Utc};
use metrics::counter;
use tailsync_config::shared::SnapshotConfig;
use tracing::{debug, info, warn};

use crate::checkpoint::ShardCheckpointRegistry;
use crate::clock::{Clock, threshold_hours};
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::SyncResult;
use crate::metrics::{REASON, SNAPSHOT_TOO_OLD, TABLE, TAILSYNC_RESYNCS_TOTAL};
use crate::snapshot::SnapshotScanner;
use crate::source::TableSource;
use crate::state::{SyncPhase, SyncState};
use crate::store::OffsetStore;
use crate::stream::{StreamTailClassifier, TailOutcome};
use crate::types::ChangeEvent;

/// Drives the [`SyncState`] of a table.
///
/// The engine is the only writer of the state. The scanner and the classifier read it and
/// report their progress back, which the engine applies.
#[derive(Debug)]
pub struct SyncEngine<T, O, K> {
    state: SyncState,
    scanner: SnapshotScanner<T>,
    classifier: StreamTailClassifier,
    store: O,
    clock: K,
    config: SnapshotConfig,
    registry: ShardCheckpointRegistry,
    shutdown_rx: ShutdownRx,
    // Start of the snapshot for which the startup delay was already waited.
    delayed_snapshot: Option<DateTime<Utc>>,
}

impl<T, O, K> SyncEngine<T, O, K>
where
    T: TableSource + Send + Sync,
    O: OffsetStore + Send + Sync,
    K: Clock + Send + Sync,
{
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        state: SyncState,
        scanner: SnapshotScanner<T>,
        classifier: StreamTailClassifier,
        store: O,
        clock: K,
        config: SnapshotConfig,
        registry: ShardCheckpointRegistry,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            state,
            scanner,
            classifier,
            store,
            clock,
            config,
            registry,
            shutdown_rx,
            delayed_snapshot: None,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// Returns the next events of the table.
    ///
    /// While snapshotting, one page of the table is read. While tailing, one batch of change
    /// records is drained from the queue. An empty result is normal, for example when the queue
    /// was empty or when the table had to be resynchronized. Once shutdown was signalled no
    /// events are returned.
    pub async fn poll(&mut self) -> SyncResult<Vec<ChangeEvent>> {
        if self.shutdown_rx.is_shutdown() {
            return Ok(vec![]);
        }

        match self.state.phase() {
            SyncPhase::Snapshotting => self.poll_snapshot().await,
            SyncPhase::Tailing => self.poll_tail().await,
        }
    }

    /// Records that `event` was delivered downstream.
    ///
    /// The shard position of a stream event is committed to the registry and the event offset is
    /// stored. Offsets of events emitted before the latest snapshot restart are not stored since
    /// they would resume a snapshot that was discarded.
    pub async fn commit(&self, event: &ChangeEvent) -> SyncResult<()> {
        if let Some((shard_id, sequence_number)) = event.shard_position() {
            self.registry.commit(shard_id, sequence_number).await;
        }

        if event.offset.init_sync_start != self.state.snapshot_started_at().timestamp_millis() {
            debug!(
                table = %self.state.table_name(),
                init_sync_start = event.offset.init_sync_start,
                "not storing the offset of an event emitted before the snapshot restarted"
            );
            return Ok(());
        }

        self.store.store_offset(&event.offset).await
    }

    async fn poll_snapshot(&mut self) -> SyncResult<Vec<ChangeEvent>> {
        let now = self.clock.now();

        let restart_after =
            threshold_hours("snapshot.restart_after_hours", self.config.restart_after_hours)?;
        let age = self.state.snapshot_age(now);
        if age >= restart_after {
            warn!(
                table = %self.state.table_name(),
                age_hours = age.num_hours(),
                "snapshot is running for too long, restarting it"
            );
            self.state.restart_snapshot(now);
            counter!(TAILSYNC_RESYNCS_TOTAL, TABLE => self.state.table_name().to_string(), REASON => SNAPSHOT_TOO_OLD)
                .increment(1);
            self.store_state().await?;
        }

        if !self.wait_startup_delay().await {
            return Ok(vec![]);
        }

        let page = self.scanner.scan_page(&self.state, &self.clock).await?;
        self.state.apply_snapshot_delta(&page.delta)?;

        // Without events nothing carries the new state to the store.
        if page.events.is_empty() {
            self.store_state().await?;
        }

        if self.state.phase() == SyncPhase::Tailing {
            info!(
                table = %self.state.table_name(),
                rows = self.state.rows_emitted(),
                "finished table snapshot, tailing the change log"
            );
        }

        Ok(page.events)
    }

    async fn poll_tail(&mut self) -> SyncResult<Vec<ChangeEvent>> {
        let now = self.clock.now();

        match self.classifier.drain_and_classify(&self.state, now).await? {
            TailOutcome::Events(events) => Ok(events),
            TailOutcome::Stale => {
                info!(table = %self.state.table_name(), "restarting table snapshot");
                self.state.restart_snapshot(now);
                self.store_state().await?;

                Ok(vec![])
            }
        }
    }

    /// Waits the startup delay before the first page of a new snapshot.
    ///
    /// Returns `false` if shutdown was signalled while waiting.
    async fn wait_startup_delay(&mut self) -> bool {
        let delay = self.config.startup_delay();
        let snapshot_started_at = self.state.snapshot_started_at();
        if delay.is_zero()
            || !self.state.is_fresh_snapshot()
            || self.delayed_snapshot == Some(snapshot_started_at)
        {
            return true;
        }

        info!(table = %self.state.table_name(), ?delay, "delaying the start of the table snapshot");

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown_rx.wait() => {
                info!(table = %self.state.table_name(), "shutdown requested while delaying the snapshot");
                return false;
            }
        }

        self.delayed_snapshot = Some(snapshot_started_at);

        true
    }

    async fn store_state(&self) -> SyncResult<()> {
        let offset = self.state.to_offset()?;
        self.store.store_offset(&offset).await
    }
}
