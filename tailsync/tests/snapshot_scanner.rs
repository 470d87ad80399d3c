use chrono::DateTime;
use std::sync::Arc;
use std::time::Duration;
use tailsync::conversions::EventConverter;
use tailsync::snapshot::SnapshotScanner;
use tailsync::source::TableSource;
use tailsync::state::{SyncPhase, SyncState};
use tailsync::test_utils::clock::ManualClock;
use tailsync::test_utils::record::order;
use tailsync::test_utils::source::MemoryTableSource;
use tailsync_config::shared::SnapshotConfig;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn provisioned_tables_are_paced_by_consumed_capacity() {
    let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
    // Two read capacity units halved gives one permit per second.
    let source = MemoryTableSource::new("orders", &["id"]).with_read_capacity(2);
    source
        .insert_all((1..=6).map(|i| order(&format!("o{i}"), "new")))
        .await;
    source.set_consumed_capacity(5.0).await;

    let description = source.describe_table("orders").await.unwrap();
    let config = SnapshotConfig {
        page_size: 2,
        ..SnapshotConfig::default()
    };
    let converter = Arc::new(EventConverter::new(&description, "dynamodb-"));
    let mut scanner = SnapshotScanner::new(source.clone(), &description, &config, converter);
    let clock = ManualClock::new(now);
    let mut state = SyncState::new("orders", now);

    let mut waits = vec![];
    for _ in 0..3 {
        let started = Instant::now();
        let page = scanner.scan_page(&state, &clock).await.unwrap();
        waits.push(started.elapsed());

        assert_eq!(page.events.len(), 2);
        state.apply_snapshot_delta(&page.delta).unwrap();
    }

    // The first page costs one permit, the following ones four.
    assert!(waits[0] < Duration::from_millis(10));
    assert!(waits[1] >= Duration::from_secs(1) && waits[1] < Duration::from_secs(2));
    assert!(waits[2] >= Duration::from_secs(4) && waits[2] < Duration::from_secs(5));

    assert_eq!(state.phase(), SyncPhase::Tailing);
    assert_eq!(state.rows_emitted(), 6);
}

#[tokio::test]
async fn on_demand_tables_are_not_paced() {
    let now = DateTime::from_timestamp(1_750_000_000, 0).unwrap();
    let source = MemoryTableSource::new("orders", &["id"]);
    source
        .insert_all((1..=4).map(|i| order(&format!("o{i}"), "new")))
        .await;
    source.set_consumed_capacity(500.0).await;

    let description = source.describe_table("orders").await.unwrap();
    let config = SnapshotConfig {
        page_size: 1,
        ..SnapshotConfig::default()
    };
    let converter = Arc::new(EventConverter::new(&description, "dynamodb-"));
    let mut scanner = SnapshotScanner::new(source, &description, &config, converter);
    let clock = ManualClock::new(now);
    let mut state = SyncState::new("orders", now);

    let started = Instant::now();
    while state.phase() == SyncPhase::Snapshotting {
        let page = scanner.scan_page(&state, &clock).await.unwrap();
        state.apply_snapshot_delta(&page.delta).unwrap();
    }

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(state.rows_emitted(), 4);
}
