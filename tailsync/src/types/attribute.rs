use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A row of the source table, keyed by attribute name.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single attribute value in DynamoDB JSON form.
///
/// Serializes externally tagged with the DynamoDB type descriptors, so that an [`Item`]
/// round-trips through JSON as `{"id": {"S": "42"}, "total": {"N": "10.5"}}`. Numbers and
/// binaries keep their wire representation (decimal string and base64 string).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    String(String),
    #[serde(rename = "N")]
    Number(String),
    #[serde(rename = "B")]
    Binary(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    List(Vec<AttributeValue>),
    #[serde(rename = "M")]
    Map(BTreeMap<String, AttributeValue>),
    #[serde(rename = "SS")]
    StringSet(Vec<String>),
    #[serde(rename = "NS")]
    NumberSet(Vec<String>),
    #[serde(rename = "BS")]
    BinarySet(Vec<String>),
}

impl AttributeValue {
    /// Returns the scalar representation of the value when it can be used as a key part.
    ///
    /// Only strings and numbers qualify.
    pub fn as_key_part(&self) -> Option<&str> {
        match self {
            AttributeValue::String(value) | AttributeValue::Number(value) => Some(value),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_use_dynamodb_type_descriptors() {
        let item: Item = serde_json::from_str(
            r#"{"id": {"S": "order-1"}, "total": {"N": "10.5"}, "tags": {"SS": ["a", "b"]},
                "meta": {"M": {"paid": {"BOOL": true}, "note": {"NULL": true}}}}"#,
        )
        .unwrap();

        assert_eq!(
            item["id"],
            AttributeValue::String("order-1".to_string())
        );
        assert_eq!(item["total"].as_key_part(), Some("10.5"));
        assert_eq!(item["tags"].as_key_part(), None);
        assert!(matches!(item["meta"], AttributeValue::Map(ref map) if map.len() == 2));

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["meta"]["M"]["paid"]["BOOL"], true);
    }
}
