//! Shared setup of the sync task integration tests.

use chrono::{DateTime, TimeDelta, Utc};
use tailsync::error::SyncResult;
use tailsync::shard::ShardHandler;
use tailsync::state::SyncPhase;
use tailsync::store::memory::MemoryOffsetStore;
use tailsync::task::SyncTask;
use tailsync::test_utils::checkpointer::RecordingCheckpointer;
use tailsync::test_utils::clock::ManualClock;
use tailsync::test_utils::source::MemoryTableSource;
use tailsync::types::ChangeEvent;
use tailsync_config::shared::SyncConfig;

pub const TABLE_NAME: &str = "orders";

pub type TestTask =
    SyncTask<MemoryTableSource, MemoryOffsetStore, RecordingCheckpointer, ManualClock>;
pub type TestHandler = ShardHandler<RecordingCheckpointer, ManualClock>;

/// Returns a fixed point in time, `hours` after the test epoch.
pub fn at_hours(hours: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_750_000_000, 0).unwrap() + TimeDelta::hours(hours)
}

/// Returns a configuration with short timeouts, two row pages and no startup delay.
pub fn test_config() -> SyncConfig {
    let mut config = SyncConfig::new(TABLE_NAME);
    config.snapshot.page_size = 2;
    config.snapshot.startup_delay_secs = 0;
    config.stream.queue_poll_timeout_ms = 50;
    config.stream.queue_offer_timeout_ms = 10;
    config.checkpoint.interval_secs = 1;
    config.checkpoint.release_poll_interval_ms = 10;
    config.checkpoint.release_max_wait_ms = 2_000;

    config
}

/// External dependencies of a task under test.
#[derive(Debug, Clone)]
pub struct TestContext {
    pub source: MemoryTableSource,
    pub store: MemoryOffsetStore,
    pub checkpointer: RecordingCheckpointer,
    pub clock: ManualClock,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            source: MemoryTableSource::new(TABLE_NAME, &["id"]),
            store: MemoryOffsetStore::new(),
            checkpointer: RecordingCheckpointer::new(),
            clock: ManualClock::new(at_hours(0)),
        }
    }

    pub async fn start(&self, config: SyncConfig) -> SyncResult<(TestTask, TestHandler)> {
        SyncTask::start(
            config,
            self.source.clone(),
            self.store.clone(),
            self.checkpointer.clone(),
            self.clock.clone(),
        )
        .await
    }
}

/// Polls and commits every event until the snapshot finished, returning the polled events.
pub async fn snapshot_to_completion(task: &mut TestTask) -> Vec<ChangeEvent> {
    let mut events = vec![];

    for _ in 0..100 {
        if task.phase() == SyncPhase::Tailing {
            return events;
        }

        let page = task.poll().await.unwrap();
        for event in &page {
            task.commit(event).await.unwrap();
        }
        events.extend(page);
    }

    panic!("snapshot did not complete");
}

/// Polls until a poll returns events, giving up after a few attempts.
pub async fn poll_events(task: &mut TestTask) -> Vec<ChangeEvent> {
    for _ in 0..20 {
        let events = task.poll().await.unwrap();
        if !events.is_empty() {
            return events;
        }
    }

    vec![]
}
