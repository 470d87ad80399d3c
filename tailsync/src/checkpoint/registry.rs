use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::checkpoint::Checkpointer;
use crate::metrics::{FAILED, OUTCOME, PERSISTED, TABLE, TAILSYNC_CHECKPOINTS_TOTAL};
use crate::types::{SequenceNumber, ShardId};

/// How a shard is released when its lease ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseMode {
    /// Wait until every delivered record was committed, checkpoint, then release.
    Graceful,
    /// Release immediately without checkpointing, the lease was lost.
    Abandoned,
}

/// Result of a [`ShardCheckpointRegistry::checkpoint_if_due`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// The checkpoint interval did not elapse yet.
    NotDue,
    /// No record of the shard was committed yet.
    NothingCommitted,
    /// The committed sequence number was persisted.
    Persisted(SequenceNumber),
    /// The checkpoint primitive failed, the next call retries.
    Failed,
    /// Another checkpoint of the shard is being persisted, the next call retries.
    InProgress,
    /// The shard is not registered.
    UnknownShard,
}

#[derive(Debug)]
struct ShardRecord {
    last_committed: Option<SequenceNumber>,
    last_delivered: Option<SequenceNumber>,
    last_checkpoint_at_ms: i64,
    // At most one checkpoint per shard is persisted at a time, so they land in commit order.
    checkpoint_in_flight: bool,
}

impl ShardRecord {
    fn caught_up(&self) -> bool {
        match (&self.last_committed, &self.last_delivered) {
            (_, None) => true,
            (Some(committed), Some(delivered)) => committed >= delivered,
            (None, Some(_)) => false,
        }
    }
}

/// Progress of every shard owned by the process.
///
/// The registry is the single source of truth for what was safely delivered downstream. It is
/// shared by the poll path, the shard checkpoint timers and the shard lifecycle callbacks. Each
/// shard is synchronized independently and no lock is held while a checkpoint is persisted.
#[derive(Debug, Clone)]
pub struct ShardCheckpointRegistry {
    table_name: Arc<str>,
    shards: Arc<RwLock<HashMap<ShardId, Arc<Mutex<ShardRecord>>>>>,
}

impl ShardCheckpointRegistry {
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: Arc::from(table_name),
            shards: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn shard(&self, shard_id: &ShardId) -> Option<Arc<Mutex<ShardRecord>>> {
        self.shards.read().await.get(shard_id).cloned()
    }

    /// Registers a newly assigned shard.
    ///
    /// Registering an already registered shard keeps its progress. Returns `true` when the shard
    /// was not registered before.
    pub async fn register_shard(&self, shard_id: ShardId, now_ms: i64) -> bool {
        let mut shards = self.shards.write().await;
        if shards.contains_key(&shard_id) {
            return false;
        }

        info!(table = %self.table_name, %shard_id, "registered shard");
        shards.insert(
            shard_id,
            Arc::new(Mutex::new(ShardRecord {
                last_committed: None,
                last_delivered: None,
                last_checkpoint_at_ms: now_ms,
                checkpoint_in_flight: false,
            })),
        );

        true
    }

    pub async fn is_registered(&self, shard_id: &ShardId) -> bool {
        self.shards.read().await.contains_key(shard_id)
    }

    /// Returns the identifiers of all registered shards.
    pub async fn shard_ids(&self) -> Vec<ShardId> {
        self.shards.read().await.keys().cloned().collect()
    }

    /// Records that every record of the shard up to `sequence_number` needs no further
    /// delivery.
    ///
    /// The committed sequence number only moves forward, smaller or equal sequence numbers are
    /// ignored. Returns `true` when the committed sequence number advanced.
    pub async fn mark_processed(&self, shard_id: &ShardId, sequence_number: &SequenceNumber) -> bool {
        let Some(shard) = self.shard(shard_id).await else {
            debug!(table = %self.table_name, %shard_id, %sequence_number, "ignoring progress of an unregistered shard");
            return false;
        };

        let mut shard = shard.lock().await;
        if shard
            .last_committed
            .as_ref()
            .is_some_and(|committed| committed >= sequence_number)
        {
            return false;
        }

        shard.last_committed = Some(sequence_number.clone());

        true
    }

    /// Records that the record at `sequence_number` was delivered downstream.
    pub async fn commit(&self, shard_id: &ShardId, sequence_number: &SequenceNumber) -> bool {
        self.mark_processed(shard_id, sequence_number).await
    }

    /// Records that the records of the shard up to `sequence_number` were handed to the poll
    /// path.
    pub async fn record_delivered(&self, shard_id: &ShardId, sequence_number: &SequenceNumber) {
        let Some(shard) = self.shard(shard_id).await else {
            return;
        };

        let mut shard = shard.lock().await;
        if shard
            .last_delivered
            .as_ref()
            .is_none_or(|delivered| delivered < sequence_number)
        {
            shard.last_delivered = Some(sequence_number.clone());
        }
    }

    pub async fn last_committed(&self, shard_id: &ShardId) -> Option<SequenceNumber> {
        let shard = self.shard(shard_id).await?;
        let shard = shard.lock().await;

        shard.last_committed.clone()
    }

    pub async fn last_delivered(&self, shard_id: &ShardId) -> Option<SequenceNumber> {
        let shard = self.shard(shard_id).await?;
        let shard = shard.lock().await;

        shard.last_delivered.clone()
    }

    /// Persists the committed sequence number of the shard if `interval` elapsed since the last
    /// checkpoint.
    ///
    /// A failed checkpoint is logged and does not reset the interval, so the next call retries.
    /// While another checkpoint of the shard is being persisted nothing is done and
    /// [`CheckpointOutcome::InProgress`] is returned.
    pub async fn checkpoint_if_due<C>(
        &self,
        shard_id: &ShardId,
        now_ms: i64,
        interval: Duration,
        checkpointer: &C,
    ) -> CheckpointOutcome
    where
        C: Checkpointer + Sync,
    {
        let Some(shard) = self.shard(shard_id).await else {
            return CheckpointOutcome::UnknownShard;
        };

        let committed = {
            let mut shard = shard.lock().await;

            if shard.checkpoint_in_flight {
                return CheckpointOutcome::InProgress;
            }

            let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
            if now_ms.saturating_sub(shard.last_checkpoint_at_ms) < interval_ms {
                return CheckpointOutcome::NotDue;
            }

            let Some(committed) = shard.last_committed.clone() else {
                return CheckpointOutcome::NothingCommitted;
            };

            shard.checkpoint_in_flight = true;
            committed
        };

        let result = checkpointer.persist_checkpoint(shard_id, &committed).await;

        let mut record = shard.lock().await;
        record.checkpoint_in_flight = false;
        match result {
            Ok(()) => {
                record.last_checkpoint_at_ms = now_ms;
                drop(record);

                counter!(TAILSYNC_CHECKPOINTS_TOTAL, TABLE => self.table_name.to_string(), OUTCOME => PERSISTED)
                    .increment(1);
                debug!(table = %self.table_name, %shard_id, sequence_number = %committed, "checkpointed shard");

                CheckpointOutcome::Persisted(committed)
            }
            Err(err) => {
                drop(record);
                counter!(TAILSYNC_CHECKPOINTS_TOTAL, TABLE => self.table_name.to_string(), OUTCOME => FAILED)
                    .increment(1);
                error!(table = %self.table_name, %shard_id, sequence_number = %committed, error = %err, "failed to checkpoint shard, retrying on the next tick");

                CheckpointOutcome::Failed
            }
        }
    }

    /// Releases a shard whose lease ended.
    ///
    /// A graceful release waits, polling every `poll_interval`, until the committed sequence
    /// number reaches the last delivered one and no timer checkpoint is being persisted, then
    /// checkpoints it on a best effort basis. The wait is capped by `max_wait` so that a stalled
    /// consumer cannot block the release forever. If a timer checkpoint is still being persisted
    /// at that point the release checkpoint is skipped, since it could land before the older one.
    /// An abandoned release forgets the shard right away.
    ///
    /// Returns `false` when the shard was not registered.
    pub async fn release_shard<C>(
        &self,
        shard_id: &ShardId,
        mode: ReleaseMode,
        checkpointer: &C,
        poll_interval: Duration,
        max_wait: Duration,
    ) -> bool
    where
        C: Checkpointer + Sync,
    {
        let Some(shard) = self.shard(shard_id).await else {
            return false;
        };

        if mode == ReleaseMode::Graceful {
            let deadline = Instant::now() + max_wait;
            let committed = loop {
                {
                    let mut record = shard.lock().await;
                    let timed_out = Instant::now() >= deadline;
                    if !record.checkpoint_in_flight && (record.caught_up() || timed_out) {
                        if timed_out && !record.caught_up() {
                            warn!(table = %self.table_name, %shard_id, ?max_wait, "shard did not catch up before release, checkpointing the committed progress");
                        }
                        // Keeps the timer from persisting concurrently with the release.
                        record.checkpoint_in_flight = record.last_committed.is_some();
                        break record.last_committed.clone();
                    }

                    if timed_out {
                        warn!(table = %self.table_name, %shard_id, ?max_wait, "checkpoint still in flight at release, skipping the release checkpoint");
                        break None;
                    }
                }

                tokio::time::sleep(poll_interval).await;
            };

            if let Some(committed) = committed {
                if let Err(err) = checkpointer.persist_checkpoint(shard_id, &committed).await {
                    warn!(table = %self.table_name, %shard_id, sequence_number = %committed, error = %err, "failed to checkpoint released shard");
                }
                shard.lock().await.checkpoint_in_flight = false;
            }
        }

        self.shards.write().await.remove(shard_id);
        info!(table = %self.table_name, %shard_id, ?mode, "released shard");

        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Notify;

    use super::*;
    use crate::bail;
    use crate::error::{ErrorKind, SyncResult};

    #[derive(Default)]
    struct Recorder {
        checkpoints: StdMutex<Vec<(ShardId, SequenceNumber)>>,
        fail: StdMutex<bool>,
    }

    impl Checkpointer for Recorder {
        async fn persist_checkpoint(
            &self,
            shard_id: &ShardId,
            sequence_number: &SequenceNumber,
        ) -> SyncResult<()> {
            if *self.fail.lock().unwrap() {
                bail!(ErrorKind::CheckpointFailed, "Lease lost");
            }

            self.checkpoints
                .lock()
                .unwrap()
                .push((shard_id.clone(), sequence_number.clone()));

            Ok(())
        }
    }

    fn seq(s: &str) -> SequenceNumber {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn committed_sequence_number_is_monotonic() {
        let registry = ShardCheckpointRegistry::new("orders");
        let shard_id = ShardId::new("shard-1");
        registry.register_shard(shard_id.clone(), 0).await;

        assert!(registry.mark_processed(&shard_id, &seq("99")).await);
        assert!(registry.commit(&shard_id, &seq("100")).await);
        // Lexicographically larger but numerically smaller.
        assert!(!registry.mark_processed(&shard_id, &seq("99")).await);
        assert!(!registry.commit(&shard_id, &seq("0100")).await);
        assert!(!registry.mark_processed(&shard_id, &seq("1")).await);

        assert_eq!(registry.last_committed(&shard_id).await, Some(seq("100")));
    }

    #[tokio::test]
    async fn registering_twice_keeps_progress() {
        let registry = ShardCheckpointRegistry::new("orders");
        let shard_id = ShardId::new("shard-1");

        assert!(registry.register_shard(shard_id.clone(), 0).await);
        registry.commit(&shard_id, &seq("5")).await;
        assert!(!registry.register_shard(shard_id.clone(), 0).await);

        assert_eq!(registry.last_committed(&shard_id).await, Some(seq("5")));
        assert!(!registry.commit(&ShardId::new("unknown"), &seq("5")).await);
    }

    #[tokio::test]
    async fn checkpoints_only_when_due_and_committed() {
        let registry = ShardCheckpointRegistry::new("orders");
        let checkpointer = Recorder::default();
        let shard_id = ShardId::new("shard-1");
        let interval = Duration::from_secs(15);
        registry.register_shard(shard_id.clone(), 0).await;

        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 15_000, interval, &checkpointer)
                .await,
            CheckpointOutcome::NothingCommitted
        );

        registry.commit(&shard_id, &seq("7")).await;
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 14_999, interval, &checkpointer)
                .await,
            CheckpointOutcome::NotDue
        );
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 15_000, interval, &checkpointer)
                .await,
            CheckpointOutcome::Persisted(seq("7"))
        );
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 20_000, interval, &checkpointer)
                .await,
            CheckpointOutcome::NotDue
        );
        assert_eq!(
            registry
                .checkpoint_if_due(&ShardId::new("unknown"), 20_000, interval, &checkpointer)
                .await,
            CheckpointOutcome::UnknownShard
        );

        assert_eq!(
            *checkpointer.checkpoints.lock().unwrap(),
            vec![(shard_id, seq("7"))]
        );
    }

    #[tokio::test]
    async fn failed_checkpoints_are_retried() {
        let registry = ShardCheckpointRegistry::new("orders");
        let checkpointer = Recorder::default();
        let shard_id = ShardId::new("shard-1");
        let interval = Duration::from_secs(15);
        registry.register_shard(shard_id.clone(), 0).await;
        registry.commit(&shard_id, &seq("7")).await;

        *checkpointer.fail.lock().unwrap() = true;
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 15_000, interval, &checkpointer)
                .await,
            CheckpointOutcome::Failed
        );

        *checkpointer.fail.lock().unwrap() = false;
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 15_001, interval, &checkpointer)
                .await,
            CheckpointOutcome::Persisted(seq("7"))
        );
    }

    #[tokio::test]
    async fn abandoned_release_skips_the_checkpoint() {
        let registry = ShardCheckpointRegistry::new("orders");
        let checkpointer = Recorder::default();
        let shard_id = ShardId::new("shard-1");
        registry.register_shard(shard_id.clone(), 0).await;
        registry.record_delivered(&shard_id, &seq("9")).await;

        assert!(
            registry
                .release_shard(
                    &shard_id,
                    ReleaseMode::Abandoned,
                    &checkpointer,
                    Duration::from_millis(10),
                    Duration::from_secs(10),
                )
                .await
        );

        assert!(!registry.is_registered(&shard_id).await);
        assert!(checkpointer.checkpoints.lock().unwrap().is_empty());
    }

    /// Checkpointer whose first persist blocks until released.
    #[derive(Default)]
    struct GatedCheckpointer {
        entered: Notify,
        gate: Notify,
        gated: StdMutex<bool>,
        checkpoints: StdMutex<Vec<SequenceNumber>>,
    }

    impl Checkpointer for GatedCheckpointer {
        async fn persist_checkpoint(
            &self,
            _shard_id: &ShardId,
            sequence_number: &SequenceNumber,
        ) -> SyncResult<()> {
            let gated = std::mem::replace(&mut *self.gated.lock().unwrap(), false);
            if gated {
                self.entered.notify_one();
                self.gate.notified().await;
            }

            self.checkpoints.lock().unwrap().push(sequence_number.clone());

            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn checkpoints_of_a_shard_never_overlap() {
        let registry = ShardCheckpointRegistry::new("orders");
        let checkpointer = Arc::new(GatedCheckpointer::default());
        *checkpointer.gated.lock().unwrap() = true;
        let shard_id = ShardId::new("shard-1");
        let interval = Duration::from_secs(15);
        registry.register_shard(shard_id.clone(), 0).await;
        registry.commit(&shard_id, &seq("10")).await;
        registry.record_delivered(&shard_id, &seq("20")).await;

        let timer = tokio::spawn({
            let registry = registry.clone();
            let checkpointer = checkpointer.clone();
            let shard_id = shard_id.clone();
            async move {
                registry
                    .checkpoint_if_due(&shard_id, 15_000, interval, checkpointer.as_ref())
                    .await
            }
        });
        checkpointer.entered.notified().await;

        registry.commit(&shard_id, &seq("20")).await;
        assert_eq!(
            registry
                .checkpoint_if_due(&shard_id, 30_000, interval, checkpointer.as_ref())
                .await,
            CheckpointOutcome::InProgress
        );

        let release = tokio::spawn({
            let registry = registry.clone();
            let checkpointer = checkpointer.clone();
            let shard_id = shard_id.clone();
            async move {
                registry
                    .release_shard(
                        &shard_id,
                        ReleaseMode::Graceful,
                        checkpointer.as_ref(),
                        Duration::from_millis(10),
                        Duration::from_secs(10),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!release.is_finished());
        assert!(checkpointer.checkpoints.lock().unwrap().is_empty());

        checkpointer.gate.notify_one();
        assert_eq!(timer.await.unwrap(), CheckpointOutcome::Persisted(seq("10")));
        assert!(release.await.unwrap());

        assert_eq!(
            *checkpointer.checkpoints.lock().unwrap(),
            vec![seq("10"), seq("20")]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_release_gives_up_after_the_maximum_wait() {
        let registry = ShardCheckpointRegistry::new("orders");
        let checkpointer = Recorder::default();
        let shard_id = ShardId::new("shard-1");
        registry.register_shard(shard_id.clone(), 0).await;
        registry.commit(&shard_id, &seq("3")).await;
        registry.record_delivered(&shard_id, &seq("9")).await;

        let start = Instant::now();
        registry
            .release_shard(
                &shard_id,
                ReleaseMode::Graceful,
                &checkpointer,
                Duration::from_millis(500),
                Duration::from_secs(10),
            )
            .await;

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert!(!registry.is_registered(&shard_id).await);
        assert_eq!(
            *checkpointer.checkpoints.lock().unwrap(),
            vec![(shard_id, seq("3"))]
        );
    }
}
