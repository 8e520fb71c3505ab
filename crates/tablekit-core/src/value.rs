//! The closed value type accepted by every builder argument.
//!
//! Callers pass `impl Into<Value>`; the [`Codec`](crate::codec::Codec) turns a
//! `Value` into a wire [`AttributeValue`] exactly once, so the compiler only
//! ever deals with wire values and placeholders.

use std::collections::BTreeMap;

use bytes::Bytes;
use tablekit_model::AttributeValue;

use crate::error::{Error, Result};

/// A document value prior to encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number, kept in its decimal string form.
    Number(String),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Binary(Bytes),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// Set of strings.
    StringSet(Vec<String>),
    /// Set of numbers.
    NumberSet(Vec<String>),
    /// Set of byte strings.
    BinarySet(Vec<Bytes>),
}

impl Value {
    /// A number from anything that prints as one.
    pub fn number(n: impl std::fmt::Display) -> Self {
        Self::Number(n.to_string())
    }

    /// A string set.
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StringSet(items.into_iter().map(Into::into).collect())
    }

    /// A number set.
    pub fn number_set<I, N>(items: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: std::fmt::Display,
    {
        Self::NumberSet(items.into_iter().map(|n| n.to_string()).collect())
    }

    /// A binary set.
    pub fn binary_set<I, B>(items: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self::BinarySet(items.into_iter().map(Into::into).collect())
    }

    /// Returns `true` for values an omit-empty field never stores: the empty
    /// string, zero, `false`, null and empty collections.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Bool(b) => !b,
            Self::Number(n) => n.parse::<f64>().is_ok_and(|f| f == 0.0),
            Self::String(s) => s.is_empty(),
            Self::Binary(b) => b.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Map(m) => m.is_empty(),
            Self::StringSet(s) | Self::NumberSet(s) => s.is_empty(),
            Self::BinarySet(s) => s.is_empty(),
        }
    }

    /// Returns the list elements, if this is a list.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integral number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// Build a value from JSON. Every JSON number keeps its textual form.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.to_string()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert to JSON for deserializing into a record.
    ///
    /// Binary payloads become arrays of bytes so that `Vec<u8>` fields
    /// round-trip; sets become arrays.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(n)?,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Binary(b) => bytes_to_json(b),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(Self::to_json).collect::<Result<_>>()?,
            ),
            Self::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), v.to_json()?)))
                    .collect::<Result<_>>()?,
            ),
            Self::StringSet(items) => serde_json::Value::Array(
                items
                    .iter()
                    .cloned()
                    .map(serde_json::Value::String)
                    .collect(),
            ),
            Self::NumberSet(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|n| number_to_json(n))
                    .collect::<Result<_>>()?,
            ),
            Self::BinarySet(items) => {
                serde_json::Value::Array(items.iter().map(bytes_to_json).collect())
            }
        })
    }
}

fn number_to_json(n: &str) -> Result<serde_json::Value> {
    if let Ok(i) = n.parse::<i64>() {
        return Ok(i.into());
    }
    if let Ok(u) = n.parse::<u64>() {
        return Ok(u.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(serde_json::Value::Number)
        .ok_or_else(|| Error::codec(format!("`{n}` is not a representable number")))
}

fn bytes_to_json(b: &Bytes) -> serde_json::Value {
    serde_json::Value::Array(b.iter().map(|byte| (*byte).into()).collect())
}

impl From<&AttributeValue> for Value {
    fn from(av: &AttributeValue) -> Self {
        match av {
            AttributeValue::S(s) => Self::String(s.clone()),
            AttributeValue::N(n) => Self::Number(n.clone()),
            AttributeValue::B(b) => Self::Binary(b.clone()),
            AttributeValue::Ss(v) => Self::StringSet(v.clone()),
            AttributeValue::Ns(v) => Self::NumberSet(v.clone()),
            AttributeValue::Bs(v) => Self::BinarySet(v.clone()),
            AttributeValue::Bool(b) => Self::Bool(*b),
            AttributeValue::Null(_) => Self::Null,
            AttributeValue::L(items) => Self::List(items.iter().map(Self::from).collect()),
            AttributeValue::M(map) => Self::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Self::String(s.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_number {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Self::Number(n.to_string())
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Self::Binary(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeMap<String, T>> for Value {
    fn from(map: BTreeMap<String, T>) -> Self {
        Self::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Value {
    fn from(ts: chrono::DateTime<chrono::Utc>) -> Self {
        Self::String(ts.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Self::from_json(json)
    }
}
