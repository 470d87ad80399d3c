use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};

static REGISTER_METRICS: Once = Once::new();

pub const TAILSYNC_SNAPSHOT_ROWS_TOTAL: &str = "tailsync_snapshot_rows_total";
pub const TAILSYNC_STREAM_EVENTS_TOTAL: &str = "tailsync_stream_events_total";
pub const TAILSYNC_SKIPPED_RECORDS_TOTAL: &str = "tailsync_skipped_records_total";
pub const TAILSYNC_RESYNCS_TOTAL: &str = "tailsync_resyncs_total";
pub const TAILSYNC_CHECKPOINTS_TOTAL: &str = "tailsync_checkpoints_total";
pub const TAILSYNC_SNAPSHOT_PAGE_DURATION_SECONDS: &str =
    "tailsync_snapshot_page_duration_seconds";

pub const TABLE: &str = "table";
pub const OP: &str = "op";
pub const REASON: &str = "reason";
pub const OUTCOME: &str = "outcome";

pub const PRE_SNAPSHOT: &str = "pre_snapshot";
pub const CONVERSION_ERROR: &str = "conversion_error";
pub const SNAPSHOT_TOO_OLD: &str = "snapshot_too_old";
pub const DANGER_ZONE: &str = "danger_zone";
pub const PERSISTED: &str = "persisted";
pub const FAILED: &str = "failed";

/// Registers the descriptions of the metrics emitted by tailsync.
///
/// Safe to call multiple times, the descriptions are registered once.
pub(crate) fn register_metrics() {
    REGISTER_METRICS.call_once(|| {
        describe_counter!(
            TAILSYNC_SNAPSHOT_ROWS_TOTAL,
            Unit::Count,
            "Total number of rows emitted by table snapshots"
        );

        describe_counter!(
            TAILSYNC_STREAM_EVENTS_TOTAL,
            Unit::Count,
            "Total number of change events emitted from the streaming tail, by operation"
        );

        describe_counter!(
            TAILSYNC_SKIPPED_RECORDS_TOTAL,
            Unit::Count,
            "Total number of change records marked processed without emitting an event"
        );

        describe_counter!(
            TAILSYNC_RESYNCS_TOTAL,
            Unit::Count,
            "Total number of snapshot restarts, by trigger"
        );

        describe_counter!(
            TAILSYNC_CHECKPOINTS_TOTAL,
            Unit::Count,
            "Total number of shard checkpoint attempts, by outcome"
        );

        describe_histogram!(
            TAILSYNC_SNAPSHOT_PAGE_DURATION_SECONDS,
            Unit::Seconds,
            "Time taken in seconds to read and convert a snapshot page"
        );
    });
}
