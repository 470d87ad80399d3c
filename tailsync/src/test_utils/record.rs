use chrono::{DateTime, Utc};

use crate::types::{AttributeValue, ChangeRecord, Item};

/// Builds an item from attribute name and value pairs.
pub fn item<'a>(attributes: impl IntoIterator<Item = (&'a str, AttributeValue)>) -> Item {
    attributes
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

pub fn string(value: &str) -> AttributeValue {
    AttributeValue::String(value.to_string())
}

pub fn number(value: impl ToString) -> AttributeValue {
    AttributeValue::Number(value.to_string())
}

/// Builds a row of a table keyed by the string attribute `id`.
pub fn order(id: &str, status: &str) -> Item {
    item([("id", string(id)), ("status", string(status))])
}

/// Builds a change record of a table keyed by the string attribute `id`.
///
/// # Panics
///
/// Panics if `sequence_number` is not a valid sequence number.
pub fn change_record(
    event_name: &str,
    id: &str,
    new_image: Option<Item>,
    sequence_number: &str,
    arrival_time: DateTime<Utc>,
) -> ChangeRecord {
    ChangeRecord {
        event_name: event_name.to_string(),
        keys: item([("id", string(id))]),
        new_image,
        arrival_time,
        sequence_number: sequence_number
            .parse()
            .expect("test sequence numbers must be valid"),
    }
}

pub fn insert_record(
    id: &str,
    status: &str,
    sequence_number: &str,
    arrival_time: DateTime<Utc>,
) -> ChangeRecord {
    change_record(
        "INSERT",
        id,
        Some(order(id, status)),
        sequence_number,
        arrival_time,
    )
}

pub fn modify_record(
    id: &str,
    status: &str,
    sequence_number: &str,
    arrival_time: DateTime<Utc>,
) -> ChangeRecord {
    change_record(
        "MODIFY",
        id,
        Some(order(id, status)),
        sequence_number,
        arrival_time,
    )
}

pub fn remove_record(id: &str, sequence_number: &str, arrival_time: DateTime<Utc>) -> ChangeRecord {
    change_record("REMOVE", id, None, sequence_number, arrival_time)
}
