//! DynamoDB output types for the operations the client issues.
//!
//! All output structs use `PascalCase` JSON field naming to match the DynamoDB
//! wire protocol. Missing fields deserialize to their defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ConsumedCapacity, Item, Key, KeysAndAttributes, WriteRequest};

// ---------------------------------------------------------------------------
// Item CRUD
// ---------------------------------------------------------------------------

/// Output for the `PutItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PutItemOutput {
    /// The attribute values as they appeared before the put.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Output for the `GetItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GetItemOutput {
    /// The requested item, or `None` if no matching item was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Output for the `UpdateItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateItemOutput {
    /// The attribute values as specified by `ReturnValues`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Output for the `DeleteItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteItemOutput {
    /// The attribute values as they appeared before the delete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Item>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

// ---------------------------------------------------------------------------
// Query & Scan
// ---------------------------------------------------------------------------

/// Output for the `Query` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryOutput {
    /// The items that match the query criteria.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,

    /// The number of items in the response (after filtering).
    #[serde(default)]
    pub count: i32,

    /// The number of items evaluated before filtering.
    #[serde(default)]
    pub scanned_count: i32,

    /// The primary key of the item where the operation stopped. Used for
    /// pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Key>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

/// Output for the `Scan` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScanOutput {
    /// The items that match the scan criteria.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,

    /// The number of items in the response (after filtering).
    #[serde(default)]
    pub count: i32,

    /// The number of items evaluated before filtering.
    #[serde(default)]
    pub scanned_count: i32,

    /// The primary key of the item where the operation stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_evaluated_key: Option<Key>,

    /// The capacity units consumed by the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumed_capacity: Option<ConsumedCapacity>,
}

// ---------------------------------------------------------------------------
// Batch operations
// ---------------------------------------------------------------------------

/// Output for the `BatchGetItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchGetItemOutput {
    /// A map of table names to the items retrieved from each table.
    #[serde(default)]
    pub responses: BTreeMap<String, Vec<Item>>,

    /// Keys that were not processed, to be retried.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unprocessed_keys: BTreeMap<String, KeysAndAttributes>,
}

/// Output for the `BatchWriteItem` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchWriteItemOutput {
    /// Write requests that were not processed, to be retried.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unprocessed_items: BTreeMap<String, Vec<WriteRequest>>,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Output for the `TransactWriteItems` operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransactWriteItemsOutput {
    /// Capacity consumed per table.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed_capacity: Vec<ConsumedCapacity>,
}
