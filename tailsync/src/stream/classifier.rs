use chrono::{DateTime, Utc};
use metrics::counter;
use std::sync::Arc;
use tailsync_config::shared::StreamConfig;
use tracing::{debug, warn};

use crate::checkpoint::ShardCheckpointRegistry;
use crate::clock::{hours_before, threshold_hours};
use crate::error::SyncResult;
use crate::conversions::EventConverter;
use crate::metrics::{
    CONVERSION_ERROR, DANGER_ZONE, OP, PRE_SNAPSHOT, REASON, TABLE, TAILSYNC_RESYNCS_TOTAL,
    TAILSYNC_SKIPPED_RECORDS_TOTAL, TAILSYNC_STREAM_EVENTS_TOTAL,
};
use crate::state::SyncState;
use crate::stream::queue::BatchReceiver;
use crate::types::ChangeEvent;

/// Result of draining one batch of the streaming tail.
#[derive(Debug, Clone, PartialEq)]
pub enum TailOutcome {
    /// Events to emit, possibly none.
    Events(Vec<ChangeEvent>),
    /// A record is too old to trust the snapshot it builds on, the table must be resynchronized.
    /// The batch was abandoned.
    Stale,
}

/// Turns the change records delivered by the shard producers into change events.
#[derive(Debug)]
pub struct StreamTailClassifier {
    receiver: BatchReceiver,
    registry: ShardCheckpointRegistry,
    converter: Arc<EventConverter>,
    config: StreamConfig,
    table_name: String,
}

impl StreamTailClassifier {
    pub fn new(
        receiver: BatchReceiver,
        registry: ShardCheckpointRegistry,
        converter: Arc<EventConverter>,
        config: StreamConfig,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            receiver,
            registry,
            converter,
            config,
            table_name: table_name.into(),
        }
    }

    /// Pulls at most one batch from the queue and classifies its records against `state`.
    ///
    /// Records that arrived well before the snapshot started are already covered by it and are
    /// marked processed without an event, as are records that cannot be converted. A record
    /// older than the danger zone aborts the whole batch with [`TailOutcome::Stale`].
    ///
    /// Fails if the configured thresholds cannot be applied to `now`.
    pub async fn drain_and_classify(
        &mut self,
        state: &SyncState,
        now: DateTime<Utc>,
    ) -> SyncResult<TailOutcome> {
        let pre_snapshot_margin = threshold_hours(
            "stream.pre_snapshot_margin_hours",
            self.config.pre_snapshot_margin_hours,
        )?;
        let danger_zone = threshold_hours("stream.danger_zone_hours", self.config.danger_zone_hours)?;
        let danger_zone_start = hours_before(now, "stream.danger_zone_hours", danger_zone)?;

        let Some(batch) = self
            .receiver
            .recv_timeout(self.config.queue_poll_timeout())
            .await
        else {
            return Ok(TailOutcome::Events(vec![]));
        };

        let snapshot_started_at = state.snapshot_started_at();

        let shard_id = &batch.shard_id;
        let mut events = Vec::with_capacity(batch.records.len());
        for record in &batch.records {
            // Records too far in the future to shift are never pre-snapshot.
            let covered_by_snapshot = record
                .arrival_time
                .checked_add_signed(pre_snapshot_margin)
                .is_some_and(|shifted| shifted <= snapshot_started_at);
            if covered_by_snapshot {
                self.registry
                    .mark_processed(shard_id, &record.sequence_number)
                    .await;
                counter!(TAILSYNC_SKIPPED_RECORDS_TOTAL, TABLE => self.table_name.clone(), REASON => PRE_SNAPSHOT)
                    .increment(1);
                continue;
            }

            if record.arrival_time <= danger_zone_start {
                warn!(
                    table = %self.table_name,
                    %shard_id,
                    sequence_number = %record.sequence_number,
                    arrival_time = %record.arrival_time,
                    "change record is in the danger zone, resynchronizing the table"
                );
                counter!(TAILSYNC_RESYNCS_TOTAL, TABLE => self.table_name.clone(), REASON => DANGER_ZONE)
                    .increment(1);

                return Ok(TailOutcome::Stale);
            }

            match self.converter.stream_events(state, shard_id, record) {
                Ok(converted) => {
                    if let Some(op) = converted.first().and_then(|event| event.operation()) {
                        counter!(TAILSYNC_STREAM_EVENTS_TOTAL, TABLE => self.table_name.clone(), OP => op.code())
                            .increment(1);
                    }
                    events.extend(converted);
                }
                Err(err) => {
                    warn!(
                        table = %self.table_name,
                        %shard_id,
                        sequence_number = %record.sequence_number,
                        error = %err,
                        "skipping change record that cannot be converted"
                    );
                    self.registry
                        .mark_processed(shard_id, &record.sequence_number)
                        .await;
                    counter!(TAILSYNC_SKIPPED_RECORDS_TOTAL, TABLE => self.table_name.clone(), REASON => CONVERSION_ERROR)
                        .increment(1);
                }
            }
        }

        debug!(table = %self.table_name, %shard_id, records = batch.records.len(), events = events.len(), "classified change records");

        Ok(TailOutcome::Events(events))
    }
}
