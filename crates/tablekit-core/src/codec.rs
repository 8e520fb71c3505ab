//! Conversion between [`Value`]s, records and wire [`AttributeValue`]s.
//!
//! Records go through `serde_json::Value`: a record serializes to a JSON
//! object whose keys are mapped to attribute names by the [`Schema`]. The
//! codec fails closed: anything it cannot represent is an error, never a null.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tablekit_model::{AttributeValue, Item};

use crate::error::{Error, Result};
use crate::schema::{FieldSpec, Schema, TypeHint};
use crate::value::Value;

/// A named custom encoding, selected per field with [`FieldSpec::converter`].
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// Encode a value for storage.
    fn encode(&self, value: &Value) -> Result<AttributeValue>;
    /// Decode a stored value.
    fn decode(&self, value: &AttributeValue) -> Result<Value>;
}

/// Encryption of individual attributes at rest.
pub trait FieldEncryptor: Send + Sync + fmt::Debug {
    /// Encrypt an encoded attribute; the result must be a binary value.
    fn encrypt(&self, attribute: &str, value: &AttributeValue) -> Result<AttributeValue>;
    /// Reverse [`FieldEncryptor::encrypt`].
    fn decrypt(&self, attribute: &str, value: &AttributeValue) -> Result<AttributeValue>;
}

/// The value codec shared by every request a client issues.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    converters: BTreeMap<String, Arc<dyn ValueConverter>>,
    encryptor: Option<Arc<dyn FieldEncryptor>>,
}

impl Codec {
    /// A codec with built-in encodings only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a converter under `name`.
    #[must_use]
    pub fn with_converter(
        mut self,
        name: impl Into<String>,
        converter: impl ValueConverter + 'static,
    ) -> Self {
        self.converters.insert(name.into(), Arc::new(converter));
        self
    }

    /// Configure the encryptor used for encrypted fields.
    #[must_use]
    pub fn with_encryptor(mut self, encryptor: impl FieldEncryptor + 'static) -> Self {
        self.encryptor = Some(Arc::new(encryptor));
        self
    }

    /// Encode a value, honouring the field's converter and type hint.
    pub fn encode(&self, value: &Value, field: Option<&FieldSpec>) -> Result<AttributeValue> {
        if let Some(name) = field.and_then(|f| f.converter.as_deref()) {
            return self.converter(name)?.encode(value);
        }
        encode_value(value, field.map_or(TypeHint::Auto, |f| f.hint))
    }

    /// Decode a wire value with the built-in rules.
    #[must_use]
    pub fn decode(&self, value: &AttributeValue) -> Value {
        Value::from(value)
    }

    /// Encode the value stored under `attribute`, encrypting it when the
    /// schema says so.
    pub fn encode_field(
        &self,
        schema: &Schema,
        attribute: &str,
        value: &Value,
    ) -> Result<AttributeValue> {
        let spec = schema.field_spec(attribute);
        let encoded = self.encode(value, spec)?;
        if !spec.is_some_and(|s| s.encrypted) {
            return Ok(encoded);
        }
        let encryptor = self.encryptor(attribute)?;
        match encryptor.encrypt(attribute, &encoded)? {
            out @ AttributeValue::B(_) => Ok(out),
            other => Err(Error::codec(format!(
                "encryptor returned {} for `{attribute}`, expected B",
                other.type_descriptor()
            ))),
        }
    }

    /// Decode the value stored under `attribute`.
    pub fn decode_field(
        &self,
        schema: &Schema,
        attribute: &str,
        value: &AttributeValue,
    ) -> Result<Value> {
        let spec = schema.field_spec(attribute);
        let decrypted;
        let value = if spec.is_some_and(|s| s.encrypted) {
            decrypted = self.encryptor(attribute)?.decrypt(attribute, value)?;
            &decrypted
        } else {
            value
        };
        match spec.and_then(|s| s.converter.as_deref()) {
            Some(name) => self.converter(name)?.decode(value),
            None => Ok(self.decode(value)),
        }
    }

    /// Encode a record into an item. JSON nulls, empty sets and empty
    /// omit-empty fields are left out.
    pub fn encode_record<T: Serialize>(&self, record: &T, schema: &Schema) -> Result<Item> {
        let json = serde_json::to_value(record)
            .map_err(|e| Error::codec(format!("failed to serialize record: {e}")))?;
        let serde_json::Value::Object(fields) = json else {
            return Err(Error::codec("record must serialize to a JSON object"));
        };

        let mut item = Item::new();
        for (field, json) in fields {
            let value = Value::from_json(json);
            let attribute = schema.attribute_name(&field);
            if value == Value::Null
                || schema.omits(&attribute, &value)
                || is_empty_set(&value, schema.field_spec(&attribute))
            {
                continue;
            }
            let encoded = self.encode_field(schema, &attribute, &value)?;
            item.insert(attribute, encoded);
        }
        Ok(item)
    }

    /// Decode an item into a record.
    pub fn decode_record<T: DeserializeOwned>(&self, item: Item, schema: &Schema) -> Result<T> {
        let mut object = serde_json::Map::with_capacity(item.len());
        for (attribute, value) in &item {
            let decoded = self.decode_field(schema, attribute, value)?;
            object.insert(schema.field_name(attribute), decoded.to_json()?);
        }
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| Error::codec(format!("failed to decode item into record: {e}")))
    }

    fn converter(&self, name: &str) -> Result<&Arc<dyn ValueConverter>> {
        self.converters
            .get(name)
            .ok_or_else(|| Error::validation(format!("converter `{name}` is not registered")))
    }

    fn encryptor(&self, attribute: &str) -> Result<&Arc<dyn FieldEncryptor>> {
        self.encryptor
            .as_ref()
            .ok_or_else(|| Error::EncryptionNotConfigured {
                field: attribute.to_owned(),
            })
    }
}

/// The store has no empty set, so a record holding one stores nothing.
fn is_empty_set(value: &Value, field: Option<&FieldSpec>) -> bool {
    match value {
        Value::StringSet(items) | Value::NumberSet(items) => items.is_empty(),
        Value::BinarySet(items) => items.is_empty(),
        Value::List(items) => {
            items.is_empty()
                && field.is_some_and(|f| matches!(f.hint, TypeHint::Set | TypeHint::BinarySet))
        }
        _ => false,
    }
}

fn encode_value(value: &Value, hint: TypeHint) -> Result<AttributeValue> {
    match (value, hint) {
        (Value::Null, _) => Ok(AttributeValue::Null(true)),
        (Value::Bool(b), _) => Ok(AttributeValue::Bool(*b)),
        (Value::Number(n), _) => Ok(AttributeValue::N(check_number(n)?)),
        (Value::String(s), _) => Ok(AttributeValue::S(s.clone())),
        (Value::Binary(b), _) => Ok(AttributeValue::B(b.clone())),
        (Value::StringSet(items), _) => Ok(AttributeValue::Ss(dedup(non_empty(items.clone())?))),
        (Value::NumberSet(items), _) => {
            let checked = items
                .iter()
                .map(|n| check_number(n))
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributeValue::Ns(dedup(non_empty(checked)?)))
        }
        (Value::BinarySet(items), _) => Ok(AttributeValue::Bs(dedup(non_empty(items.clone())?))),
        (Value::List(items), TypeHint::Set) => list_to_set(items),
        (Value::List(items), TypeHint::Binary) => Ok(AttributeValue::B(list_to_bytes(items)?)),
        (Value::List(items), TypeHint::BinarySet) => {
            let members = items
                .iter()
                .map(|item| match item {
                    Value::List(bytes) => list_to_bytes(bytes),
                    Value::Binary(b) => Ok(b.clone()),
                    _ => Err(Error::codec("binary set members must be byte arrays")),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributeValue::Bs(dedup(non_empty(members)?)))
        }
        (Value::List(items), TypeHint::Auto) => Ok(AttributeValue::L(
            items
                .iter()
                .map(|v| encode_value(v, TypeHint::Auto))
                .collect::<Result<_>>()?,
        )),
        (Value::Map(map), _) => Ok(AttributeValue::M(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), encode_value(v, TypeHint::Auto)?)))
                .collect::<Result<_>>()?,
        )),
    }
}

fn check_number(n: &str) -> Result<String> {
    match n.parse::<f64>() {
        Ok(f) if f.is_finite() => Ok(n.to_owned()),
        _ => Err(Error::codec(format!("`{n}` is not a finite number"))),
    }
}

fn non_empty<T>(items: Vec<T>) -> Result<Vec<T>> {
    if items.is_empty() {
        return Err(Error::codec("sets cannot be empty"));
    }
    Ok(items)
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn list_to_set(items: &[Value]) -> Result<AttributeValue> {
    match items.first() {
        None => Err(Error::codec("sets cannot be empty")),
        Some(Value::String(_)) => {
            let members = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(mixed_set(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributeValue::Ss(dedup(members)))
        }
        Some(Value::Number(_)) => {
            let members = items
                .iter()
                .map(|v| match v {
                    Value::Number(n) => check_number(n),
                    other => Err(mixed_set(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributeValue::Ns(dedup(members)))
        }
        Some(Value::Binary(_)) => {
            let members = items
                .iter()
                .map(|v| match v {
                    Value::Binary(b) => Ok(b.clone()),
                    other => Err(mixed_set(other)),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(AttributeValue::Bs(dedup(members)))
        }
        Some(other) => Err(Error::codec(format!(
            "cannot store {other:?} as a set member"
        ))),
    }
}

fn mixed_set(member: &Value) -> Error {
    Error::codec(format!("set members must share one type, found {member:?}"))
}

fn list_to_bytes(items: &[Value]) -> Result<Bytes> {
    items
        .iter()
        .map(|v| {
            v.as_i64()
                .and_then(|n| u8::try_from(n).ok())
                .ok_or_else(|| Error::codec("binary values must be arrays of bytes"))
        })
        .collect::<Result<Vec<u8>>>()
        .map(Bytes::from)
}
