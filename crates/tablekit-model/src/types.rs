//! Shared DynamoDB types used by the item, query, batch and transaction
//! operations.
//!
//! All types follow the DynamoDB JSON wire format with `PascalCase` field names.
//! Enum variants use idiomatic Rust naming with `#[serde(rename)]` attributes
//! to map to the `SCREAMING_SNAKE_CASE` wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attribute_value::AttributeValue;

// ---------------------------------------------------------------------------
// Type aliases
// ---------------------------------------------------------------------------

/// A full item: attribute name to value.
pub type Item = BTreeMap<String, AttributeValue>;

/// A primary key: only the key attributes of an item.
pub type Key = BTreeMap<String, AttributeValue>;

/// Placeholder (`#n1`) to real attribute name.
pub type ExpressionAttributeNames = BTreeMap<String, String>;

/// Placeholder (`:v1`) to literal value.
pub type ExpressionAttributeValues = BTreeMap<String, AttributeValue>;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Scalar attribute types allowed for key attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarAttributeType {
    /// String type.
    S,
    /// Number type.
    N,
    /// Binary type.
    B,
}

impl ScalarAttributeType {
    /// Returns the DynamoDB wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::B => "B",
        }
    }

    /// Returns `true` if `value` has this scalar type.
    #[must_use]
    pub fn matches(&self, value: &AttributeValue) -> bool {
        matches!(
            (self, value),
            (Self::S, AttributeValue::S(_))
                | (Self::N, AttributeValue::N(_))
                | (Self::B, AttributeValue::B(_))
        )
    }
}

impl std::fmt::Display for ScalarAttributeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines what item attributes are returned by a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReturnValue {
    /// Nothing is returned.
    #[default]
    #[serde(rename = "NONE")]
    None,
    /// Returns all attributes of the item as they appeared before the operation.
    #[serde(rename = "ALL_OLD")]
    AllOld,
    /// Returns only the updated attributes as they appeared before the operation.
    #[serde(rename = "UPDATED_OLD")]
    UpdatedOld,
    /// Returns all attributes of the item as they appear after the operation.
    #[serde(rename = "ALL_NEW")]
    AllNew,
    /// Returns only the updated attributes as they appear after the operation.
    #[serde(rename = "UPDATED_NEW")]
    UpdatedNew,
}

impl ReturnValue {
    /// Returns the DynamoDB wire-format string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::AllOld => "ALL_OLD",
            Self::UpdatedOld => "UPDATED_OLD",
            Self::AllNew => "ALL_NEW",
            Self::UpdatedNew => "UPDATED_NEW",
        }
    }
}

impl std::fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes returned by `Query` / `Scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Select {
    /// All attributes of the item.
    #[serde(rename = "ALL_ATTRIBUTES")]
    AllAttributes,
    /// All attributes projected into an index.
    #[serde(rename = "ALL_PROJECTED_ATTRIBUTES")]
    AllProjectedAttributes,
    /// Only the attributes named in the projection expression.
    #[serde(rename = "SPECIFIC_ATTRIBUTES")]
    SpecificAttributes,
    /// Only the number of matching items.
    #[serde(rename = "COUNT")]
    Count,
}

/// Whether to return the item when a condition check fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReturnValuesOnConditionCheckFailure {
    /// Return the item as it was.
    #[serde(rename = "ALL_OLD")]
    AllOld,
    /// Return nothing.
    #[default]
    #[serde(rename = "NONE")]
    None,
}

// ---------------------------------------------------------------------------
// Structs
// ---------------------------------------------------------------------------

/// Capacity units consumed by an operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConsumedCapacity {
    /// The name of the table that was affected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
    /// The total capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_units: Option<f64>,
}

/// Keys (and read options) for one table in a `BatchGetItem` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeysAndAttributes {
    /// The primary keys of the items to retrieve.
    pub keys: Vec<Key>,
    /// The attributes to retrieve. If not specified, all attributes are returned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_expression: Option<String>,
    /// Expression attribute names for substitution in `projection_expression`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: ExpressionAttributeNames,
    /// Whether to use a consistent read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consistent_read: Option<bool>,
}

/// A single write request within a `BatchWriteItem` operation.
///
/// Exactly one of `put_request` or `delete_request` must be specified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    /// A request to put an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_request: Option<PutRequest>,
    /// A request to delete an item.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_request: Option<DeleteRequest>,
}

impl WriteRequest {
    /// A put request for `item`.
    #[must_use]
    pub fn put(item: Item) -> Self {
        Self {
            put_request: Some(PutRequest { item }),
            delete_request: None,
        }
    }

    /// A delete request for `key`.
    #[must_use]
    pub fn delete(key: Key) -> Self {
        Self {
            put_request: None,
            delete_request: Some(DeleteRequest { key }),
        }
    }
}

/// Put half of a `WriteRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutRequest {
    /// The item to put.
    pub item: Item,
}

/// Delete half of a `WriteRequest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteRequest {
    /// The key of the item to delete.
    pub key: Key,
}

/// One slot of a `TransactionCanceledException`, aligned with the request's
/// operation order. A `code` of `"None"` marks an operation that did not fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancellationReason {
    /// Failure code, e.g. `ConditionalCheckFailed` or `TransactionConflict`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The item, when `ReturnValuesOnConditionCheckFailure` asked for it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

impl CancellationReason {
    /// A reason slot for an operation that did not fail.
    #[must_use]
    pub fn none() -> Self {
        Self {
            code: Some("None".to_owned()),
            message: None,
            item: None,
        }
    }

    /// A reason slot with a code and message.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: Some(message.into()),
            item: None,
        }
    }

    /// Returns `true` if this slot represents a failed operation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code.as_deref().is_some_and(|c| c != "None")
    }
}

/// One entry of a `TransactWriteItems` request. Exactly one field is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItem {
    /// A condition check on an item that is not otherwise modified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_check: Option<ConditionCheck>,
    /// A put.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put: Option<Put>,
    /// A delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Delete>,
    /// An update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update: Option<Update>,
}

impl TransactWriteItem {
    /// Name of the action this entry performs.
    #[must_use]
    pub fn action(&self) -> &'static str {
        if self.put.is_some() {
            "Put"
        } else if self.update.is_some() {
            "Update"
        } else if self.delete.is_some() {
            "Delete"
        } else {
            "ConditionCheck"
        }
    }
}

/// Transactional condition check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConditionCheck {
    /// Table name.
    pub table_name: String,
    /// Key of the checked item.
    pub key: Key,
    /// Condition that must hold.
    pub condition_expression: String,
    /// Name placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: ExpressionAttributeNames,
    /// Value placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_values: ExpressionAttributeValues,
    /// Whether to return the item on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_values_on_condition_check_failure: Option<ReturnValuesOnConditionCheckFailure>,
}

/// Transactional put.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Put {
    /// Table name.
    pub table_name: String,
    /// Full item to write.
    pub item: Item,
    /// Optional guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    /// Name placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: ExpressionAttributeNames,
    /// Value placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_values: ExpressionAttributeValues,
    /// Whether to return the item on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_values_on_condition_check_failure: Option<ReturnValuesOnConditionCheckFailure>,
}

/// Transactional delete.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Delete {
    /// Table name.
    pub table_name: String,
    /// Key of the item to delete.
    pub key: Key,
    /// Optional guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    /// Name placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: ExpressionAttributeNames,
    /// Value placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_values: ExpressionAttributeValues,
    /// Whether to return the item on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_values_on_condition_check_failure: Option<ReturnValuesOnConditionCheckFailure>,
}

/// Transactional update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Update {
    /// Table name.
    pub table_name: String,
    /// Key of the item to update.
    pub key: Key,
    /// SET / REMOVE / ADD / DELETE clauses.
    pub update_expression: String,
    /// Optional guard.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_expression: Option<String>,
    /// Name placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_names: ExpressionAttributeNames,
    /// Value placeholders.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub expression_attribute_values: ExpressionAttributeValues,
    /// Whether to return the item on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_values_on_condition_check_failure: Option<ReturnValuesOnConditionCheckFailure>,
}
