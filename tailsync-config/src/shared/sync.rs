use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Upper bound of the change log retention, which bounds every other time threshold.
pub const MAX_RETENTION_HOURS: u64 = 24 * 365;

/// Configuration of the replication of a single table.
///
/// Contains every value consumed by the synchronization engine: how the snapshot is read, how
/// the streaming tail is classified and how shard progress is checkpointed.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SyncConfig {
    /// Name of the replicated table, also the key of its persisted resumption state.
    pub table_name: String,
    /// Prefix prepended to the table name to build the destination topic.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Snapshot phase configuration.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Streaming tail configuration.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Shard checkpointing configuration.
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

fn default_topic_prefix() -> String {
    "dynamodb-".to_string()
}

impl SyncConfig {
    /// Creates a configuration with default values for the given table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            topic_prefix: default_topic_prefix(),
            snapshot: SnapshotConfig::default(),
            stream: StreamConfig::default(),
            checkpoint: CheckpointConfig::default(),
        }
    }

    /// Validates the configuration.
    ///
    /// Besides rejecting zero values, the time thresholds must be consistent with the upstream
    /// retention window: a snapshot has to be restarted before its records can reach the danger
    /// zone, and the danger zone has to start before records are dropped upstream.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.table_name.is_empty() {
            return Err(ValidationError::EmptyTableName);
        }

        self.snapshot.validate()?;
        self.stream.validate()?;
        self.checkpoint.validate()?;

        check_order(
            "snapshot.restart_after_hours",
            self.snapshot.restart_after_hours,
            "stream.danger_zone_hours",
            self.stream.danger_zone_hours,
        )?;

        Ok(())
    }
}

/// Configuration of the full table scan.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct SnapshotConfig {
    /// Maximum number of rows read per scan page.
    pub page_size: usize,
    /// The provisioned read capacity is divided by this value to obtain the scan rate, leaving
    /// headroom for the other readers of the table.
    pub rate_limit_divisor: u64,
    /// Seconds waited before the first page of a new snapshot, giving the shard coordinator
    /// time to start delivering records.
    pub startup_delay_secs: u64,
    /// A snapshot running for this many hours is restarted.
    pub restart_after_hours: u64,
}

impl SnapshotConfig {
    /// Returns the startup delay as a [`Duration`].
    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::Zero("snapshot.page_size"));
        }

        if self.rate_limit_divisor == 0 {
            return Err(ValidationError::Zero("snapshot.rate_limit_divisor"));
        }

        if self.restart_after_hours == 0 {
            return Err(ValidationError::Zero("snapshot.restart_after_hours"));
        }

        Ok(())
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            rate_limit_divisor: 2,
            startup_delay_secs: 60,
            restart_after_hours: 19,
        }
    }
}

/// Configuration of the streaming tail.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StreamConfig {
    /// Records that arrived at least this many hours before the snapshot start are already
    /// covered by the snapshot.
    pub pre_snapshot_margin_hours: u64,
    /// Records older than this many hours are close to the retention horizon and trigger a
    /// resync.
    pub danger_zone_hours: u64,
    /// Retention window of the upstream change log.
    pub retention_hours: u64,
    /// Capacity of the queue between the shard processors and the poll loop.
    pub queue_capacity: usize,
    /// How long a poll waits for a batch before returning no events.
    pub queue_poll_timeout_ms: u64,
    /// How long a shard processor waits for queue space before checking for shutdown and
    /// trying again.
    pub queue_offer_timeout_ms: u64,
}

impl StreamConfig {
    /// Returns the queue poll timeout as a [`Duration`].
    pub fn queue_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_poll_timeout_ms)
    }

    /// Returns the queue offer timeout as a [`Duration`].
    pub fn queue_offer_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_offer_timeout_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.queue_capacity == 0 {
            return Err(ValidationError::Zero("stream.queue_capacity"));
        }

        if self.queue_offer_timeout_ms == 0 {
            return Err(ValidationError::Zero("stream.queue_offer_timeout_ms"));
        }

        check_order(
            "stream.pre_snapshot_margin_hours",
            self.pre_snapshot_margin_hours,
            "stream.danger_zone_hours",
            self.danger_zone_hours,
        )?;
        check_order(
            "stream.danger_zone_hours",
            self.danger_zone_hours,
            "stream.retention_hours",
            self.retention_hours,
        )?;

        if self.retention_hours > MAX_RETENTION_HOURS {
            return Err(ValidationError::TooLarge {
                field: "stream.retention_hours",
                value: self.retention_hours,
                max: MAX_RETENTION_HOURS,
            });
        }

        Ok(())
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pre_snapshot_margin_hours: 1,
            danger_zone_hours: 20,
            retention_hours: 24,
            queue_capacity: 10,
            queue_poll_timeout_ms: 500,
            queue_offer_timeout_ms: 100,
        }
    }
}

/// Configuration of shard checkpointing.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct CheckpointConfig {
    /// Minimum number of seconds between two checkpoints of the same shard.
    pub interval_secs: u64,
    /// How often a graceful release checks whether the shard caught up.
    pub release_poll_interval_ms: u64,
    /// Upper bound of a graceful release wait, after which the shard is finalized anyway.
    pub release_max_wait_ms: u64,
}

impl CheckpointConfig {
    /// Returns the checkpoint interval as a [`Duration`].
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the release poll interval as a [`Duration`].
    pub fn release_poll_interval(&self) -> Duration {
        Duration::from_millis(self.release_poll_interval_ms)
    }

    /// Returns the maximum release wait as a [`Duration`].
    pub fn release_max_wait(&self) -> Duration {
        Duration::from_millis(self.release_max_wait_ms)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::Zero("checkpoint.interval_secs"));
        }

        if self.release_poll_interval_ms == 0 {
            return Err(ValidationError::Zero("checkpoint.release_poll_interval_ms"));
        }

        Ok(())
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_secs: 15,
            release_poll_interval_ms: 500,
            release_max_wait_ms: 10_000,
        }
    }
}

fn check_order(
    lower: &'static str,
    lower_value: u64,
    upper: &'static str,
    upper_value: u64,
) -> Result<(), ValidationError> {
    if lower_value >= upper_value {
        return Err(ValidationError::ThresholdOrder {
            lower,
            lower_value,
            upper,
            upper_value,
        });
    }

    Ok(())
}
