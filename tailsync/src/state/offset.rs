use serde::{Deserialize, Serialize};

use crate::state::SyncPhase;
use crate::types::{SequenceNumber, ShardId};

/// Persisted form of a [`crate::state::SyncState`], carried by every emitted event.
///
/// Once an event is acknowledged, its offset becomes the point the table resumes from. Streaming
/// tail events additionally carry the shard position of the change they were built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOffset {
    pub version: String,
    pub table_name: String,
    pub init_sync_state: SyncPhase,
    /// Snapshot start in milliseconds since the Unix epoch.
    pub init_sync_start: i64,
    /// JSON encoded key of the last row read by the running snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclusive_start_key: Option<String>,
    /// Snapshot end in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_sync_end: Option<i64>,
    pub init_sync_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_shard_id: Option<ShardId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_shard_sequence_num: Option<SequenceNumber>,
}

impl SourceOffset {
    /// Returns this offset positioned at a change of the streaming tail.
    pub fn at_shard_position(mut self, shard_id: ShardId, sequence_number: SequenceNumber) -> Self {
        self.src_shard_id = Some(shard_id);
        self.src_shard_sequence_num = Some(sequence_number);
        self
    }
}
