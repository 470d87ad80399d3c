use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::source::TableDescription;
use crate::state::{SourceOffset, SyncState};
use crate::types::{
    ChangeEvent, ChangeRecord, ENVELOPE_VERSION, Envelope, Item, Operation, ShardId,
    SourcePartition,
};

/// Builds the [`ChangeEvent`]s of a table from snapshot rows and change records.
#[derive(Debug, Clone)]
pub struct EventConverter {
    table_name: String,
    topic: String,
    key_attributes: Vec<String>,
}

impl EventConverter {
    /// Creates a converter publishing to `{topic_prefix}{table_name}`.
    pub fn new(description: &TableDescription, topic_prefix: &str) -> Self {
        Self {
            table_name: description.table_name.clone(),
            topic: format!("{topic_prefix}{}", description.table_name),
            key_attributes: description.key_attributes.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Builds the read event of a snapshot row, stamped with `state`.
    ///
    /// Read events are timestamped with the start of their snapshot.
    pub fn snapshot_event(&self, state: &SyncState, item: &Item) -> SyncResult<ChangeEvent> {
        self.build(
            state,
            Operation::Read,
            item,
            state.snapshot_started_at(),
            state.to_offset()?,
        )
    }

    /// Builds the events of a change record read from `shard_id`.
    ///
    /// A removal yields the delete event followed by its tombstone.
    pub fn stream_events(
        &self,
        state: &SyncState,
        shard_id: &ShardId,
        record: &ChangeRecord,
    ) -> SyncResult<Vec<ChangeEvent>> {
        let op = Operation::from_event_name(&record.event_name)?;
        let offset = state
            .to_offset()?
            .at_shard_position(shard_id.clone(), record.sequence_number.clone());

        let event = self.build(state, op, record.payload(), record.arrival_time, offset)?;

        if op == Operation::Delete {
            let tombstone = event.tombstone();
            return Ok(vec![event, tombstone]);
        }

        Ok(vec![event])
    }

    fn build(
        &self,
        state: &SyncState,
        op: Operation,
        item: &Item,
        timestamp: DateTime<Utc>,
        offset: SourceOffset,
    ) -> SyncResult<ChangeEvent> {
        let key = self.key(item)?;
        let document = serde_json::to_value(item)?;

        Ok(ChangeEvent {
            partition: SourcePartition {
                table_name: self.table_name.clone(),
            },
            offset,
            topic: self.topic.clone(),
            key,
            value: Some(Envelope {
                version: ENVELOPE_VERSION.to_string(),
                document,
                source: state.source_info(op == Operation::Read),
                op,
                ts_ms: timestamp.timestamp_millis(),
            }),
        })
    }

    fn key(&self, item: &Item) -> SyncResult<BTreeMap<String, String>> {
        let mut key = BTreeMap::new();

        for attribute in &self.key_attributes {
            let Some(part) = item.get(attribute).and_then(|value| value.as_key_part()) else {
                bail!(
                    ErrorKind::ConversionError,
                    "Key attributes must be present as strings or numbers",
                    attribute
                );
            };

            key.insert(attribute.clone(), part.to_string());
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SyncPhase;
    use crate::types::AttributeValue;

    fn converter() -> EventConverter {
        EventConverter::new(
            &TableDescription {
                table_name: "orders".to_string(),
                key_attributes: vec!["id".to_string(), "region".to_string()],
                read_capacity_units: None,
            },
            "dynamodb-",
        )
    }

    fn item(id: &str) -> Item {
        Item::from([
            ("id".to_string(), AttributeValue::String(id.to_string())),
            ("region".to_string(), AttributeValue::Number("7".to_string())),
            ("paid".to_string(), AttributeValue::Bool(true)),
        ])
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn record(event_name: &str, new_image: Option<Item>) -> ChangeRecord {
        ChangeRecord {
            event_name: event_name.to_string(),
            keys: Item::from([
                ("id".to_string(), AttributeValue::String("a".to_string())),
                ("region".to_string(), AttributeValue::Number("7".to_string())),
            ]),
            new_image,
            arrival_time: at(50_000),
            sequence_number: "300".parse().unwrap(),
        }
    }

    #[test]
    fn snapshot_events_are_reads_stamped_with_the_snapshot_start() {
        let state = SyncState::new("orders", at(10_000));

        let event = converter().snapshot_event(&state, &item("a")).unwrap();

        assert_eq!(event.topic, "dynamodb-orders");
        assert_eq!(event.partition.table_name, "orders");
        assert_eq!(event.key["id"], "a");
        assert_eq!(event.key["region"], "7");
        assert_eq!(event.shard_position(), None);

        let envelope = event.value.unwrap();
        assert_eq!(envelope.op, Operation::Read);
        assert_eq!(envelope.ts_ms, 10_000);
        assert!(envelope.source.init_sync);
        assert_eq!(envelope.source.init_sync_state, SyncPhase::Snapshotting);
        assert_eq!(envelope.document["paid"]["BOOL"], true);
    }

    #[test]
    fn removals_are_followed_by_a_tombstone() {
        let state = SyncState::new("orders", at(10_000));
        let shard_id = ShardId::new("shard-1");

        let events = converter()
            .stream_events(&state, &shard_id, &record("REMOVE", None))
            .unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].operation(), Some(Operation::Delete));
        assert_eq!(events[0].value.as_ref().unwrap().ts_ms, 50_000);
        assert!(!events[0].value.as_ref().unwrap().source.init_sync);
        assert!(events[1].is_tombstone());
        assert_eq!(events[1].key, events[0].key);
        assert_eq!(events[1].offset, events[0].offset);
        assert_eq!(events[1].topic, events[0].topic);

        let (shard, sequence_number) = events[1].shard_position().unwrap();
        assert_eq!(shard, &shard_id);
        assert_eq!(sequence_number.as_str(), "300");
    }

    #[test]
    fn changes_prefer_the_new_image() {
        let state = SyncState::new("orders", at(10_000));
        let shard_id = ShardId::new("shard-1");

        let events = converter()
            .stream_events(&state, &shard_id, &record("MODIFY", Some(item("a"))))
            .unwrap();

        assert_eq!(events.len(), 1);
        let envelope = events[0].value.as_ref().unwrap();
        assert_eq!(envelope.op, Operation::Update);
        assert_eq!(envelope.document["paid"]["BOOL"], true);
    }

    #[test]
    fn unsupported_keys_and_event_names_fail_conversion() {
        let state = SyncState::new("orders", at(10_000));
        let shard_id = ShardId::new("shard-1");

        let mut binary_key = item("a");
        binary_key.insert("id".to_string(), AttributeValue::Binary("AAE=".to_string()));
        let err = converter().snapshot_event(&state, &binary_key).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
        assert_eq!(err.detail(), Some("id"));

        let err = converter()
            .stream_events(&state, &shard_id, &record("TTL_EXPIRED", None))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionError);
    }
}
