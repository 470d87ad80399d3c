use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::state::{SourceOffset, SyncPhase};
use crate::types::{SequenceNumber, ShardId};

/// Version of the emitted envelope and offset formats.
pub const ENVELOPE_VERSION: &str = "1.0";

/// Kind of row level change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Row read by a snapshot.
    #[serde(rename = "r")]
    Read,
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
}

impl Operation {
    /// Maps an upstream change log event name to an [`Operation`].
    pub fn from_event_name(event_name: &str) -> SyncResult<Self> {
        match event_name {
            "INSERT" => Ok(Operation::Create),
            "MODIFY" => Ok(Operation::Update),
            "REMOVE" => Ok(Operation::Delete),
            other => bail!(
                ErrorKind::ConversionError,
                "Unsupported change log event name",
                other
            ),
        }
    }

    /// Returns the single letter code of the operation.
    pub fn code(&self) -> &'static str {
        match self {
            Operation::Read => "r",
            Operation::Create => "c",
            Operation::Update => "u",
            Operation::Delete => "d",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Partition of the source an event belongs to, one per replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePartition {
    pub table_name: String,
}

/// Replication metadata embedded in every envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub version: String,
    pub table_name: String,
    /// Whether the event was produced by a snapshot.
    pub init_sync: bool,
    pub init_sync_state: SyncPhase,
    pub init_sync_start: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub init_sync_end: Option<i64>,
    pub init_sync_count: u64,
}

/// Value of a non tombstone [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: String,
    /// Row attributes in DynamoDB JSON form.
    pub document: serde_json::Value,
    pub source: SourceInfo,
    pub op: Operation,
    pub ts_ms: i64,
}

/// Event emitted for a row read by a snapshot or a change read from the streaming tail.
///
/// Acknowledging an event makes its [`SourceOffset`] the resumption point of the table. A
/// tombstone has the same key, topic, partition and offset as the delete it follows, and no
/// value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub partition: SourcePartition,
    pub offset: SourceOffset,
    pub topic: String,
    pub key: BTreeMap<String, String>,
    pub value: Option<Envelope>,
}

impl ChangeEvent {
    /// Builds the tombstone following this event.
    pub fn tombstone(&self) -> ChangeEvent {
        ChangeEvent {
            partition: self.partition.clone(),
            offset: self.offset.clone(),
            topic: self.topic.clone(),
            key: self.key.clone(),
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the operation of the event, [`None`] for tombstones.
    pub fn operation(&self) -> Option<Operation> {
        self.value.as_ref().map(|envelope| envelope.op)
    }

    /// Returns the shard position of a streaming tail event.
    pub fn shard_position(&self) -> Option<(&ShardId, &SequenceNumber)> {
        match (
            &self.offset.src_shard_id,
            &self.offset.src_shard_sequence_num,
        ) {
            (Some(shard_id), Some(sequence_number)) => Some((shard_id, sequence_number)),
            _ => None,
        }
    }
}
