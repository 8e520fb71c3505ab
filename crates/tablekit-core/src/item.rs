//! Turning records and caller-supplied keys into wire items and keys.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Map;
use tablekit_model::{AttributeValue, Item, Key};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::expr::{FieldCompare, Operator, UpdateOp};
use crate::schema::Schema;
use crate::value::Value;

/// Primary key values of one record, in field form.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKey {
    /// Partition key value.
    pub partition: Value,
    /// Sort key value, for tables that have one.
    pub sort: Option<Value>,
}

impl RecordKey {
    /// A partition-only key.
    pub fn new(partition: impl Into<Value>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    /// Add the sort key value.
    #[must_use]
    pub fn with_sort(mut self, sort: impl Into<Value>) -> Self {
        self.sort = Some(sort.into());
        self
    }
}

impl From<&str> for RecordKey {
    fn from(partition: &str) -> Self {
        Self::new(partition)
    }
}

impl From<String> for RecordKey {
    fn from(partition: String) -> Self {
        Self::new(partition)
    }
}

impl<P: Into<Value>, S: Into<Value>> From<(P, S)> for RecordKey {
    fn from((partition, sort): (P, S)) -> Self {
        Self::new(partition).with_sort(sort)
    }
}

/// How audit timestamps are stamped on a full-item write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stamp {
    /// `created_at == updated_at == now`.
    Create,
    /// Keep a `created_at` the record already carries.
    Upsert,
}

/// Current time in RFC 3339, UTC.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Serialize a record to its JSON fields.
pub(crate) fn record_json<T: Serialize>(record: &T) -> Result<Map<String, serde_json::Value>> {
    match serde_json::to_value(record) {
        Ok(serde_json::Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(Error::codec("record must serialize to a JSON object")),
        Err(e) => Err(Error::codec(format!("failed to serialize record: {e}"))),
    }
}

/// Encode a record for a put: stamp timestamps and default the version to 0.
pub(crate) fn prepare_item<T: Serialize>(
    schema: &Schema,
    codec: &Codec,
    record: &T,
    stamp: Stamp,
) -> Result<Item> {
    let mut item = codec.encode_record(record, schema)?;
    let now = Value::String(timestamp());

    if let Some(attribute) = schema.created_at_attribute() {
        let keep = stamp == Stamp::Upsert
            && item
                .get(attribute)
                .is_some_and(|v| !matches!(v, AttributeValue::S(s) if s.is_empty()));
        if !keep {
            let encoded = codec.encode_field(schema, attribute, &now)?;
            item.insert(attribute.to_owned(), encoded);
        }
    }
    if let Some(attribute) = schema.updated_at_attribute() {
        let encoded = codec.encode_field(schema, attribute, &now)?;
        item.insert(attribute.to_owned(), encoded);
    }
    if let Some(attribute) = schema.version_attribute() {
        item.entry(attribute.to_owned())
            .or_insert_with(|| AttributeValue::number(0));
    }
    Ok(item)
}

/// The value a record holds for `field` (schema field or attribute name).
pub(crate) fn record_field(
    schema: &Schema,
    json: &Map<String, serde_json::Value>,
    field: &str,
) -> Value {
    let attribute = schema.attribute_name(field);
    json.get(field)
        .or_else(|| json.get(&schema.field_name(&attribute)))
        .cloned()
        .map_or(Value::Null, Value::from_json)
}

/// The record's current version, if the schema has a version field and the
/// record carries a number there.
pub(crate) fn record_version(schema: &Schema, json: &Map<String, serde_json::Value>) -> Option<i64> {
    let attribute = schema.version_attribute()?;
    record_field(schema, json, attribute).as_i64()
}

/// The table key of a record.
pub(crate) fn record_key(
    schema: &Schema,
    codec: &Codec,
    json: &Map<String, serde_json::Value>,
) -> Result<Key> {
    let mut key = Key::new();
    let pk = schema.partition_key()?;
    let mut attributes = vec![pk.attribute.as_str()];
    if let Some(sk) = schema.sort_key() {
        attributes.push(sk.attribute.as_str());
    }
    for attribute in attributes {
        let value = record_field(schema, json, attribute);
        if value == Value::Null {
            return Err(Error::validation(format!(
                "record has no value for key attribute `{attribute}`"
            )));
        }
        key.insert(
            attribute.to_owned(),
            codec.encode_field(schema, attribute, &value)?,
        );
    }
    schema.check_key(&key)?;
    Ok(key)
}

/// Encode a caller-supplied key.
pub(crate) fn encode_key(schema: &Schema, codec: &Codec, key: &RecordKey) -> Result<Key> {
    let mut out = Key::new();
    let pk = &schema.partition_key()?.attribute;
    out.insert(pk.clone(), codec.encode_field(schema, pk, &key.partition)?);
    match (schema.sort_key(), &key.sort) {
        (Some(sk), Some(value)) => {
            out.insert(
                sk.attribute.clone(),
                codec.encode_field(schema, &sk.attribute, value)?,
            );
        }
        (None, None) => {}
        (Some(sk), None) => {
            return Err(Error::validation(format!(
                "table `{}` needs a value for sort key `{}`",
                schema.table(),
                sk.attribute
            )));
        }
        (None, Some(_)) => {
            return Err(Error::validation(format!(
                "table `{}` has no sort key",
                schema.table()
            )));
        }
    }
    schema.check_key(&out)?;
    Ok(out)
}

/// The table key named by `where` clauses, when they are exactly one
/// equality per key attribute.
pub(crate) fn key_from_conditions(
    schema: &Schema,
    codec: &Codec,
    conditions: &[FieldCompare],
) -> Result<Option<Key>> {
    let pk = schema.partition_key()?;
    let expected = 1 + usize::from(schema.sort_key().is_some());
    if conditions.len() != expected {
        return Ok(None);
    }
    let mut key = Key::new();
    for condition in conditions {
        if condition.op != Operator::Eq || condition.size {
            return Ok(None);
        }
        let attribute = schema.attribute_name(&condition.field);
        let is_key = attribute == pk.attribute
            || schema.sort_key().is_some_and(|sk| sk.attribute == attribute);
        if !is_key || key.contains_key(&attribute) {
            return Ok(None);
        }
        let encoded = codec.encode_field(schema, &attribute, &condition.value)?;
        key.insert(attribute, encoded);
    }
    schema.check_key(&key)?;
    Ok(Some(key))
}

/// `SET` operations copying `fields` from a record. Null fields are removed;
/// empty omit-empty fields are left out.
pub(crate) fn field_updates(
    schema: &Schema,
    json: &Map<String, serde_json::Value>,
    fields: &[&str],
) -> Result<Vec<UpdateOp>> {
    let mut ops = Vec::with_capacity(fields.len());
    for field in fields {
        let attribute = schema.attribute_name(field);
        if schema.is_key_attribute(&attribute) {
            return Err(Error::validation(format!(
                "key attribute `{attribute}` cannot be updated"
            )));
        }
        let value = record_field(schema, json, field);
        if value == Value::Null {
            ops.push(UpdateOp::Remove((*field).to_owned()));
        } else if !schema.omits(&attribute, &value) {
            ops.push(UpdateOp::Set {
                field: (*field).to_owned(),
                value,
            });
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use tablekit_model::types::ScalarAttributeType;

    use super::*;
    use crate::schema::{FieldSpec, Record};

    #[derive(Debug, Serialize, Deserialize)]
    struct Order {
        customer_id: String,
        order_id: String,
        status: String,
        #[serde(default)]
        note: String,
        #[serde(default)]
        version: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        created_at: Option<String>,
    }

    impl Record for Order {
        fn schema() -> Schema {
            Schema::builder("orders")
                .partition_key("customer_id", ScalarAttributeType::S)
                .sort_key("order_id", ScalarAttributeType::S)
                .field(FieldSpec::new("note").omit_empty())
                .version_field("version")
                .created_at("created_at")
                .updated_at("updated_at")
                .build()
        }
    }

    fn order() -> Order {
        Order {
            customer_id: "c1".to_owned(),
            order_id: "o1".to_owned(),
            status: "NEW".to_owned(),
            note: String::new(),
            version: 0,
            created_at: Some("2020-01-01T00:00:00Z".to_owned()),
        }
    }

    #[test]
    fn test_should_stamp_timestamps_on_create() {
        let schema = Order::schema();
        let item = prepare_item(&schema, &Codec::new(), &order(), Stamp::Create).unwrap();
        assert_eq!(item["created_at"], item["updated_at"]);
        assert_eq!(item["version"], AttributeValue::number(0));
        assert!(!item.contains_key("note"));
    }

    #[test]
    fn test_should_keep_created_at_on_upsert() {
        let schema = Order::schema();
        let item = prepare_item(&schema, &Codec::new(), &order(), Stamp::Upsert).unwrap();
        assert_eq!(
            item["created_at"],
            AttributeValue::S("2020-01-01T00:00:00Z".to_owned())
        );
        assert_ne!(item["created_at"], item["updated_at"]);
    }

    #[test]
    fn test_should_extract_record_key() {
        let schema = Order::schema();
        let json = record_json(&order()).unwrap();
        let key = record_key(&schema, &Codec::new(), &json).unwrap();
        assert_eq!(key.len(), 2);
        assert_eq!(key["order_id"], AttributeValue::S("o1".to_owned()));
        assert_eq!(record_version(&schema, &json), Some(0));
    }

    #[test]
    fn test_should_encode_caller_keys() {
        let schema = Order::schema();
        let codec = Codec::new();
        assert!(encode_key(&schema, &codec, &RecordKey::from(("c1", "o1"))).is_ok());
        assert!(encode_key(&schema, &codec, &RecordKey::from("c1")).is_err());
    }

    #[test]
    fn test_should_detect_full_key_equality() {
        let schema = Order::schema();
        let codec = Codec::new();
        let exact = [
            FieldCompare::new("customer_id", Operator::Eq, "c1"),
            FieldCompare::new("order_id", Operator::Eq, "o1"),
        ];
        assert!(key_from_conditions(&schema, &codec, &exact).unwrap().is_some());
        let ranged = [
            FieldCompare::new("customer_id", Operator::Eq, "c1"),
            FieldCompare::new("order_id", Operator::Gt, "o1"),
        ];
        assert!(key_from_conditions(&schema, &codec, &ranged).unwrap().is_none());
    }

    #[test]
    fn test_should_build_field_updates() {
        let schema = Order::schema();
        let json = record_json(&order()).unwrap();
        let ops = field_updates(&schema, &json, &["status", "note"]).unwrap();
        assert_eq!(
            ops,
            vec![UpdateOp::Set {
                field: "status".to_owned(),
                value: Value::from("NEW"),
            }]
        );
        assert!(field_updates(&schema, &json, &["order_id"]).is_err());
    }
}
