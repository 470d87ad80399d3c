use chrono::{DateTime, Utc};

use crate::types::{Item, SequenceNumber, ShardId};

/// A raw change record read from a shard of the upstream change log.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Upstream event name: `INSERT`, `MODIFY` or `REMOVE`.
    pub event_name: String,
    /// Key attributes of the changed row.
    pub keys: Item,
    /// Row image after the change, absent for removals.
    pub new_image: Option<Item>,
    /// Approximate time at which the change reached the change log.
    pub arrival_time: DateTime<Utc>,
    pub sequence_number: SequenceNumber,
}

impl ChangeRecord {
    /// Returns the attributes to emit: the new image if present, the keys otherwise.
    pub fn payload(&self) -> &Item {
        self.new_image.as_ref().unwrap_or(&self.keys)
    }
}

/// Ordered change records delivered for a single shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecordBatch {
    pub shard_id: ShardId,
    pub records: Vec<ChangeRecord>,
}
