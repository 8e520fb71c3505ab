//! Ordered in-memory table storage.
//!
//! Every table keeps its rows in one `BTreeMap` keyed by [`PrimaryKey`], so a
//! scan walks the table in key order and a query walks one partition in sort
//! key order. Secondary indexes are not materialized: a query or scan on an
//! index selects the rows that carry the index key attributes and orders them
//! by the index key.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::debug;

use tablekit_core::schema::{KeySpec, Schema};
use tablekit_model::types::{ExpressionAttributeNames, ExpressionAttributeValues, ScalarAttributeType};
use tablekit_model::{AttributeValue, Item, Key};

use crate::expression::ast::{CompareOp, Expr, LogicalOp, Operand, PathElement};
use crate::expression::evaluator::compare_numbers;
use crate::expression::{AttributePath, EvalContext, ExpressionError};

/// Largest item the store accepts, in bytes.
pub const MAX_ITEM_SIZE: usize = 400 * 1024;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by the storage layer. All of them surface as
/// `ValidationException`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A required key attribute was not found.
    #[error("One or more parameter values were invalid: Missing the key {attr} in the item")]
    MissingKeyAttribute {
        /// The missing attribute.
        attr: String,
    },
    /// A key attribute has the wrong type.
    #[error(
        "One or more parameter values were invalid: Type mismatch for key {attr} expected: {expected} actual: {actual}"
    )]
    InvalidKeyType {
        /// The attribute.
        attr: String,
        /// Expected type descriptor.
        expected: String,
        /// Actual type descriptor.
        actual: String,
    },
    /// A key map names attributes outside the key schema.
    #[error("The provided key element does not match the schema")]
    KeyMismatch,
    /// The request names an index the table does not have.
    #[error("The table does not have the specified index: {name}")]
    UnknownIndex {
        /// The index name.
        name: String,
    },
    /// The item exceeds [`MAX_ITEM_SIZE`].
    #[error("Item size has exceeded the maximum allowed size of {MAX_ITEM_SIZE} bytes (got {size})")]
    ItemTooLarge {
        /// Computed size.
        size: usize,
    },
    /// The exclusive start key does not describe a position on this access path.
    #[error("The provided starting key is invalid: {message}")]
    InvalidStartKey {
        /// Explanation.
        message: String,
    },
    /// The key condition cannot drive a query.
    #[error("{message}")]
    InvalidKeyCondition {
        /// Explanation.
        message: String,
    },
    /// Evaluating an expression failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

/// A key attribute with its scalar type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyAttribute {
    /// Attribute name.
    pub name: String,
    /// Scalar type.
    pub attr_type: ScalarAttributeType,
}

impl From<&KeySpec> for KeyAttribute {
    fn from(spec: &KeySpec) -> Self {
        Self {
            name: spec.attribute.clone(),
            attr_type: spec.kind,
        }
    }
}

/// Partition key plus optional sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Partition (HASH) key.
    pub partition_key: KeyAttribute,
    /// Sort (RANGE) key.
    pub sort_key: Option<KeyAttribute>,
}

impl KeySchema {
    fn attributes(&self) -> impl Iterator<Item = &KeyAttribute> {
        std::iter::once(&self.partition_key).chain(self.sort_key.as_ref())
    }

    fn is_key(&self, name: &str) -> bool {
        self.attributes().any(|k| k.name == name)
    }
}

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// Index name.
    pub name: String,
    /// Index key.
    pub key: KeySchema,
}

/// Everything the store needs to know about a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Primary key.
    pub key: KeySchema,
    /// Secondary indexes, global and local alike.
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    /// A table keyed by a partition key only.
    pub fn new(
        name: impl Into<String>,
        partition_key: impl Into<String>,
        attr_type: ScalarAttributeType,
    ) -> Self {
        Self {
            name: name.into(),
            key: KeySchema {
                partition_key: KeyAttribute {
                    name: partition_key.into(),
                    attr_type,
                },
                sort_key: None,
            },
            indexes: Vec::new(),
        }
    }

    /// Add a sort key.
    #[must_use]
    pub fn with_sort_key(mut self, name: impl Into<String>, attr_type: ScalarAttributeType) -> Self {
        self.key.sort_key = Some(KeyAttribute {
            name: name.into(),
            attr_type,
        });
        self
    }

    /// Add a secondary index.
    #[must_use]
    pub fn with_index(mut self, name: impl Into<String>, key: KeySchema) -> Self {
        self.indexes.push(IndexDefinition {
            name: name.into(),
            key,
        });
        self
    }

    /// Derive a table from a record schema.
    pub fn from_schema(schema: &Schema) -> Result<Self, StorageError> {
        let partition = schema
            .partition_key()
            .map_err(|_| StorageError::MissingKeyAttribute {
                attr: format!("<partition key of {}>", schema.table()),
            })?;
        let indexes = schema
            .indexes()
            .iter()
            .filter_map(|index| {
                let partition_key = index.partition_key.as_ref()?;
                Some(IndexDefinition {
                    name: index.name.clone(),
                    key: KeySchema {
                        partition_key: partition_key.into(),
                        sort_key: index.sort_key.as_ref().map(KeyAttribute::from),
                    },
                })
            })
            .collect();
        Ok(Self {
            name: schema.table().to_owned(),
            key: KeySchema {
                partition_key: partition.into(),
                sort_key: schema.sort_key().map(KeyAttribute::from),
            },
            indexes,
        })
    }

    /// Key schema of the table, or of `index` when given.
    pub fn key_schema(&self, index: Option<&str>) -> Result<&KeySchema, StorageError> {
        match index {
            None => Ok(&self.key),
            Some(name) => self
                .indexes
                .iter()
                .find(|i| i.name == name)
                .map(|i| &i.key)
                .ok_or_else(|| StorageError::UnknownIndex {
                    name: name.to_owned(),
                }),
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A key-eligible value ordered the way the service orders keys: strings by
/// UTF-8 bytes, numbers numerically, binary by unsigned bytes. `Sentinel`
/// stands in for an absent sort key and sorts last.
#[derive(Debug, Clone)]
pub enum SortableAttributeValue {
    /// String.
    S(String),
    /// Number, in its original representation.
    N(String),
    /// Binary.
    B(bytes::Bytes),
    /// No value.
    Sentinel,
}

impl SortableAttributeValue {
    /// Wrap a key value.
    pub fn from_attribute_value(attr: &str, value: &AttributeValue) -> Result<Self, StorageError> {
        match value {
            AttributeValue::S(s) => Ok(Self::S(s.clone())),
            AttributeValue::N(n) => Ok(Self::N(n.clone())),
            AttributeValue::B(b) => Ok(Self::B(b.clone())),
            other => Err(StorageError::InvalidKeyType {
                attr: attr.to_owned(),
                expected: "S, N, or B".to_owned(),
                actual: other.type_descriptor().to_owned(),
            }),
        }
    }

    /// Unwrap back into an attribute value; `None` for the sentinel.
    #[must_use]
    pub fn to_attribute_value(&self) -> Option<AttributeValue> {
        match self {
            Self::S(s) => Some(AttributeValue::S(s.clone())),
            Self::N(n) => Some(AttributeValue::N(n.clone())),
            Self::B(b) => Some(AttributeValue::B(b.clone())),
            Self::Sentinel => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::S(_) => 0,
            Self::N(_) => 1,
            Self::B(_) => 2,
            Self::Sentinel => 3,
        }
    }

    fn stable_bytes(&self) -> Vec<u8> {
        match self {
            Self::S(s) | Self::N(s) => s.as_bytes().to_vec(),
            Self::B(b) => b.to_vec(),
            Self::Sentinel => Vec::new(),
        }
    }
}

impl PartialEq for SortableAttributeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortableAttributeValue {}

impl PartialOrd for SortableAttributeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortableAttributeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::S(a), Self::S(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::N(a), Self::N(b)) => compare_numbers(a, b).unwrap_or_else(|| a.cmp(b)),
            (Self::B(a), Self::B(b)) => a.as_ref().cmp(b.as_ref()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// The stored position of an item.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PrimaryKey {
    /// Partition key value.
    pub partition: SortableAttributeValue,
    /// Sort key value, or the sentinel.
    pub sort: SortableAttributeValue,
}

fn key_value(
    attr: &KeyAttribute,
    item: &Item,
) -> Result<SortableAttributeValue, StorageError> {
    let value = item
        .get(&attr.name)
        .ok_or_else(|| StorageError::MissingKeyAttribute {
            attr: attr.name.clone(),
        })?;
    if !attr.attr_type.matches(value) {
        return Err(StorageError::InvalidKeyType {
            attr: attr.name.clone(),
            expected: attr.attr_type.as_str().to_owned(),
            actual: value.type_descriptor().to_owned(),
        });
    }
    SortableAttributeValue::from_attribute_value(&attr.name, value)
}

/// Extract the key of `item` under `schema`.
pub fn extract_primary_key(schema: &KeySchema, item: &Item) -> Result<PrimaryKey, StorageError> {
    Ok(PrimaryKey {
        partition: key_value(&schema.partition_key, item)?,
        sort: match &schema.sort_key {
            Some(sk) => key_value(sk, item)?,
            None => SortableAttributeValue::Sentinel,
        },
    })
}

/// Approximate stored size of an item.
#[must_use]
pub fn calculate_item_size(item: &Item) -> usize {
    item.iter().map(|(name, value)| name.len() + value.size()).sum()
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// One query or scan request against a table.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'a> {
    /// Index to read, or the base table.
    pub index: Option<&'a str>,
    /// Key condition; `None` for a scan.
    pub key_condition: Option<&'a Expr>,
    /// Filter applied after the limit.
    pub filter: Option<&'a Expr>,
    /// Projection applied to returned items.
    pub projection: Option<&'a [AttributePath]>,
    /// `#name` substitutions.
    pub names: &'a ExpressionAttributeNames,
    /// `:value` substitutions.
    pub values: &'a ExpressionAttributeValues,
    /// Ascending when `true`.
    pub forward: bool,
    /// Maximum number of items to evaluate.
    pub limit: Option<usize>,
    /// Resume after this key; empty to start at the beginning.
    pub exclusive_start_key: &'a Key,
    /// `(segment, total_segments)` for a parallel scan.
    pub segment: Option<(u32, u32)>,
    /// Return counts only.
    pub count_only: bool,
}

/// Result of a [`Selection`].
#[derive(Debug, Default)]
pub struct Selected {
    /// Matching items, projected.
    pub items: Vec<Item>,
    /// Items that passed the filter.
    pub count: usize,
    /// Items evaluated before the filter.
    pub scanned_count: usize,
    /// Position to resume from, when more items remain.
    pub last_evaluated_key: Option<Key>,
}

/// Rows of one table.
pub type Rows = BTreeMap<PrimaryKey, Item>;

/// Storage for a single table.
#[derive(Debug)]
pub struct TableStorage {
    definition: TableDefinition,
    rows: RwLock<Rows>,
}

impl TableStorage {
    /// An empty table.
    #[must_use]
    pub fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// The table definition.
    #[must_use]
    pub fn definition(&self) -> &TableDefinition {
        &self.definition
    }

    /// Shared access to the rows.
    pub fn read(&self) -> RwLockReadGuard<'_, Rows> {
        self.rows.read()
    }

    /// Exclusive access to the rows.
    pub fn write(&self) -> RwLockWriteGuard<'_, Rows> {
        self.rows.write()
    }

    /// Number of stored items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns `true` if the table holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate a key map: exactly the key attributes, correctly typed.
    pub fn key_position(&self, key: &Key) -> Result<PrimaryKey, StorageError> {
        let schema = &self.definition.key;
        if key.len() != schema.attributes().count() || key.keys().any(|k| !schema.is_key(k)) {
            return Err(StorageError::KeyMismatch);
        }
        extract_primary_key(schema, key)
    }

    /// Validate an item for writing and return its position.
    pub fn item_position(&self, item: &Item) -> Result<PrimaryKey, StorageError> {
        let position = extract_primary_key(&self.definition.key, item)?;
        for index in &self.definition.indexes {
            for attr in index.key.attributes() {
                if let Some(value) = item.get(&attr.name) {
                    if !attr.attr_type.matches(value) {
                        return Err(StorageError::InvalidKeyType {
                            attr: attr.name.clone(),
                            expected: attr.attr_type.as_str().to_owned(),
                            actual: value.type_descriptor().to_owned(),
                        });
                    }
                }
            }
        }
        let size = calculate_item_size(item);
        if size > MAX_ITEM_SIZE {
            return Err(StorageError::ItemTooLarge { size });
        }
        Ok(position)
    }

    /// Names of the table's key attributes.
    #[must_use]
    pub fn key_names(&self) -> BTreeSet<String> {
        self.definition
            .key
            .attributes()
            .map(|k| k.name.clone())
            .collect()
    }

    /// The key attributes of a stored item.
    #[must_use]
    pub fn key_of(&self, item: &Item) -> Key {
        self.definition
            .key
            .attributes()
            .filter_map(|k| item.get(&k.name).map(|v| (k.name.clone(), v.clone())))
            .collect()
    }

    /// Run a query or scan over `rows`. `page_size` caps the items evaluated
    /// in one call in addition to the request's own limit.
    pub fn select(
        &self,
        rows: &Rows,
        selection: &Selection<'_>,
        page_size: usize,
    ) -> Result<Selected, StorageError> {
        let access = self.definition.key_schema(selection.index)?;

        let partition = match selection.key_condition {
            Some(condition) => Some(partition_value(condition, selection, access)?),
            None => None,
        };

        let mut candidates = Vec::new();
        for item in rows.values() {
            let Ok(position) = self.position(access, selection.index.is_some(), item) else {
                // Not projected into the index.
                continue;
            };
            if let Some((segment, total)) = selection.segment {
                let bucket = crc32fast::hash(&position[0].stable_bytes()) % total;
                if bucket != segment {
                    continue;
                }
            }
            if let (Some(condition), Some(partition)) = (selection.key_condition, &partition) {
                if &position[0] != partition {
                    continue;
                }
                let ctx = EvalContext::new(item, selection.names, selection.values);
                if !ctx.evaluate(condition)? {
                    continue;
                }
            }
            candidates.push((position, item));
        }
        candidates.sort_by(|a, b| a.0.cmp(&b.0));
        if !selection.forward {
            candidates.reverse();
        }

        if !selection.exclusive_start_key.is_empty() {
            let start = self
                .position(access, selection.index.is_some(), selection.exclusive_start_key)
                .map_err(|e| StorageError::InvalidStartKey {
                    message: e.to_string(),
                })?;
            candidates.retain(|(position, _)| match position.cmp(&start) {
                Ordering::Greater => selection.forward,
                Ordering::Less => !selection.forward,
                Ordering::Equal => false,
            });
        }

        let budget = selection.limit.unwrap_or(usize::MAX).min(page_size.max(1));
        let more = candidates.len() > budget;
        candidates.truncate(budget);

        let mut selected = Selected {
            scanned_count: candidates.len(),
            ..Selected::default()
        };
        if more {
            selected.last_evaluated_key = candidates
                .last()
                .map(|(_, item)| self.resume_key(access, item));
        }

        for (_, item) in candidates {
            if let Some(filter) = selection.filter {
                let ctx = EvalContext::new(item, selection.names, selection.values);
                if !ctx.evaluate(filter)? {
                    continue;
                }
            }
            selected.count += 1;
            if selection.count_only {
                continue;
            }
            let item = match selection.projection {
                Some(paths) => {
                    EvalContext::new(item, selection.names, selection.values)
                        .apply_projection(paths)?
                }
                None => item.clone(),
            };
            selected.items.push(item);
        }

        debug!(
            table = %self.definition.name,
            index = selection.index.unwrap_or("-"),
            scanned = selected.scanned_count,
            count = selected.count,
            more,
            "selected items"
        );
        Ok(selected)
    }

    /// Ordering tuple of an item on an access path: the access path key,
    /// then the table key so that index entries sharing a key stay distinct.
    fn position(
        &self,
        access: &KeySchema,
        on_index: bool,
        item: &Item,
    ) -> Result<Vec<SortableAttributeValue>, StorageError> {
        let own = extract_primary_key(access, item)?;
        let mut position = vec![own.partition, own.sort];
        if on_index {
            let table = extract_primary_key(&self.definition.key, item)?;
            position.push(table.partition);
            position.push(table.sort);
        }
        Ok(position)
    }

    fn resume_key(&self, access: &KeySchema, item: &Item) -> Key {
        let mut key = self.key_of(item);
        for attr in access.attributes() {
            if let Some(value) = item.get(&attr.name) {
                key.insert(attr.name.clone(), value.clone());
            }
        }
        key
    }
}

/// Find `partition = :value` in a key condition. Only conjunctions are
/// allowed, and every referenced attribute must belong to the access path key.
fn partition_value(
    condition: &Expr,
    selection: &Selection<'_>,
    access: &KeySchema,
) -> Result<SortableAttributeValue, StorageError> {
    let empty = Item::new();
    let ctx = EvalContext::new(&empty, selection.names, selection.values);
    let mut found = None;
    let mut stack = vec![condition];

    while let Some(expr) = stack.pop() {
        match expr {
            Expr::Logical {
                op: LogicalOp::And,
                left,
                right,
            } => {
                stack.push(left.as_ref());
                stack.push(right.as_ref());
            }
            Expr::Logical {
                op: LogicalOp::Or, ..
            }
            | Expr::Not(_)
            | Expr::In { .. } => {
                return Err(StorageError::InvalidKeyCondition {
                    message: "Invalid operator used in KeyConditionExpression".to_owned(),
                });
            }
            Expr::Compare { left, op, right } => {
                let (path, value) = match (left, right) {
                    (Operand::Path(p), Operand::Value(v)) | (Operand::Value(v), Operand::Path(p)) => {
                        (p, v)
                    }
                    _ => {
                        return Err(StorageError::InvalidKeyCondition {
                            message: "KeyConditionExpression compares two attributes".to_owned(),
                        });
                    }
                };
                let name = key_name(&ctx, path, access)?;
                if name == access.partition_key.name {
                    if *op != CompareOp::Eq {
                        return Err(StorageError::InvalidKeyCondition {
                            message: format!(
                                "Query key condition not supported: partition key {name} must use ="
                            ),
                        });
                    }
                    let value = ctx.operand(&Operand::Value(value.clone()))?;
                    if let Some(value) = value {
                        found = Some(key_value(
                            &access.partition_key,
                            &Item::from([(name.to_owned(), value)]),
                        )?);
                    }
                }
            }
            Expr::Between { value, .. } => {
                if let Operand::Path(path) = value {
                    key_name(&ctx, path, access)?;
                }
            }
            Expr::Function { args, .. } => {
                if let Some(Operand::Path(path)) = args.first() {
                    key_name(&ctx, path, access)?;
                }
            }
        }
    }

    found.ok_or_else(|| StorageError::InvalidKeyCondition {
        message: format!(
            "Query condition missed key schema element: {}",
            access.partition_key.name
        ),
    })
}

fn key_name<'c>(
    ctx: &'c EvalContext<'_>,
    path: &'c AttributePath,
    access: &KeySchema,
) -> Result<&'c str, StorageError> {
    let [PathElement::Attribute(name)] = path.elements.as_slice() else {
        return Err(StorageError::InvalidKeyCondition {
            message: format!("KeyConditionExpression uses a nested path: {path}"),
        });
    };
    let name = ctx.name(name)?;
    if access.is_key(name) {
        Ok(name)
    } else {
        Err(StorageError::InvalidKeyCondition {
            message: format!("Query key condition not supported: {name} is not a key attribute"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{parse_condition, parse_projection};

    fn s(v: &str) -> AttributeValue {
        AttributeValue::S(v.to_owned())
    }

    fn n(v: i64) -> AttributeValue {
        AttributeValue::number(v)
    }

    fn make_item(pairs: &[(&str, AttributeValue)]) -> Item {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn orders() -> TableStorage {
        let table = TableStorage::new(
            TableDefinition::new("orders", "customer", ScalarAttributeType::S)
                .with_sort_key("seq", ScalarAttributeType::N)
                .with_index(
                    "by-status",
                    KeySchema {
                        partition_key: KeyAttribute {
                            name: "status".to_owned(),
                            attr_type: ScalarAttributeType::S,
                        },
                        sort_key: None,
                    },
                ),
        );
        {
            let mut rows = table.write();
            for seq in 1..=10 {
                let mut item = make_item(&[("customer", s("c1")), ("seq", n(seq))]);
                if seq % 2 == 0 {
                    item.insert("status".to_owned(), s("OPEN"));
                }
                let position = table.item_position(&item).unwrap();
                rows.insert(position, item);
            }
            let other = make_item(&[("customer", s("c2")), ("seq", n(1))]);
            rows.insert(table.item_position(&other).unwrap(), other);
        }
        table
    }

    fn query<'a>(
        condition: &'a Expr,
        names: &'a ExpressionAttributeNames,
        values: &'a ExpressionAttributeValues,
        start: &'a Key,
    ) -> Selection<'a> {
        Selection {
            index: None,
            key_condition: Some(condition),
            filter: None,
            projection: None,
            names,
            values,
            forward: true,
            limit: None,
            exclusive_start_key: start,
            segment: None,
            count_only: false,
        }
    }

    #[test]
    fn test_should_order_numbers_numerically() {
        let nine = SortableAttributeValue::N("9".to_owned());
        let ten = SortableAttributeValue::N("10".to_owned());
        assert!(nine < ten);
        assert!(SortableAttributeValue::S("z".to_owned()) < SortableAttributeValue::Sentinel);
    }

    #[test]
    fn test_should_reject_keys_outside_the_schema() {
        let table = orders();
        let key = make_item(&[("customer", s("c1")), ("seq", n(1)), ("extra", n(1))]);
        assert!(matches!(table.key_position(&key), Err(StorageError::KeyMismatch)));
        let key = make_item(&[("customer", n(1)), ("seq", n(1))]);
        assert!(matches!(
            table.key_position(&key),
            Err(StorageError::InvalidKeyType { .. })
        ));
    }

    #[test]
    fn test_should_reject_oversized_items() {
        let table = orders();
        let item = make_item(&[
            ("customer", s("c1")),
            ("seq", n(1)),
            ("blob", s(&"x".repeat(MAX_ITEM_SIZE))),
        ]);
        assert!(matches!(
            table.item_position(&item),
            Err(StorageError::ItemTooLarge { .. })
        ));
    }

    #[test]
    fn test_should_query_one_partition_in_sort_order() {
        let table = orders();
        let condition = parse_condition("#n1 = :v1 AND #n2 > :v2").unwrap();
        let names = ExpressionAttributeNames::from([
            ("#n1".to_owned(), "customer".to_owned()),
            ("#n2".to_owned(), "seq".to_owned()),
        ]);
        let values = make_item(&[(":v1", s("c1")), (":v2", n(7))]);
        let start = Key::new();
        let rows = table.read();

        let selected = table
            .select(&rows, &query(&condition, &names, &values, &start), usize::MAX)
            .unwrap();
        let seqs: Vec<_> = selected.items.iter().map(|i| i["seq"].clone()).collect();
        assert_eq!(seqs, vec![n(8), n(9), n(10)]);
        assert!(selected.last_evaluated_key.is_none());

        let mut backwards = query(&condition, &names, &values, &start);
        backwards.forward = false;
        let selected = table.select(&rows, &backwards, usize::MAX).unwrap();
        assert_eq!(selected.items[0]["seq"], n(10));
    }

    #[test]
    fn test_should_page_with_limit_and_resume() {
        let table = orders();
        let condition = parse_condition("customer = :v1").unwrap();
        let names = ExpressionAttributeNames::new();
        let values = make_item(&[(":v1", s("c1"))]);
        let filter = parse_condition("attribute_exists(status)").unwrap();
        let rows = table.read();

        let mut seen = Vec::new();
        let mut start = Key::new();
        loop {
            let mut selection = query(&condition, &names, &values, &start);
            selection.filter = Some(&filter);
            selection.limit = Some(3);
            let page = table.select(&rows, &selection, usize::MAX).unwrap();
            assert!(page.scanned_count <= 3);
            seen.extend(page.items.into_iter().map(|i| i["seq"].clone()));
            match page.last_evaluated_key {
                Some(key) => start = key,
                None => break,
            }
        }
        assert_eq!(seen, vec![n(2), n(4), n(6), n(8), n(10)]);
    }

    #[test]
    fn test_should_require_partition_equality() {
        let table = orders();
        let names = ExpressionAttributeNames::new();
        let values = make_item(&[(":v1", n(3))]);
        let start = Key::new();
        let rows = table.read();
        for expr in ["seq > :v1", "customer > :v1", "seq = :v1 OR seq > :v1", "total = :v1"] {
            let condition = parse_condition(expr).unwrap();
            let err = table
                .select(&rows, &query(&condition, &names, &values, &start), usize::MAX)
                .unwrap_err();
            assert!(matches!(err, StorageError::InvalidKeyCondition { .. }), "{expr}");
        }
    }

    #[test]
    fn test_should_query_sparse_index_and_project() {
        let table = orders();
        let condition = parse_condition("status = :v1").unwrap();
        let names = ExpressionAttributeNames::new();
        let values = make_item(&[(":v1", s("OPEN"))]);
        let projection = parse_projection("seq").unwrap();
        let start = Key::new();
        let rows = table.read();

        let mut selection = query(&condition, &names, &values, &start);
        selection.index = Some("by-status");
        selection.projection = Some(&projection);
        selection.limit = Some(2);
        let page = table.select(&rows, &selection, usize::MAX).unwrap();
        assert_eq!(page.items, vec![make_item(&[("seq", n(2))]), make_item(&[("seq", n(4))])]);
        let resume = page.last_evaluated_key.unwrap();
        assert_eq!(resume["status"], s("OPEN"));
        assert_eq!(resume["customer"], s("c1"));
    }

    #[test]
    fn test_should_split_scan_into_disjoint_segments() {
        let table = orders();
        let names = ExpressionAttributeNames::new();
        let values = ExpressionAttributeValues::new();
        let start = Key::new();
        let rows = table.read();
        let mut total = 0;
        for segment in 0..3 {
            let selection = Selection {
                index: None,
                key_condition: None,
                filter: None,
                projection: None,
                names: &names,
                values: &values,
                forward: true,
                limit: None,
                exclusive_start_key: &start,
                segment: Some((segment, 3)),
                count_only: true,
            };
            let page = table.select(&rows, &selection, usize::MAX).unwrap();
            assert!(page.items.is_empty());
            total += page.count;
        }
        assert_eq!(total, 11);
    }

    #[test]
    fn test_should_cap_pages_at_page_size() {
        let table = orders();
        let names = ExpressionAttributeNames::new();
        let values = ExpressionAttributeValues::new();
        let start = Key::new();
        let rows = table.read();
        let selection = Selection {
            index: None,
            key_condition: None,
            filter: None,
            projection: None,
            names: &names,
            values: &values,
            forward: true,
            limit: Some(100),
            exclusive_start_key: &start,
            segment: None,
            count_only: false,
        };
        let page = table.select(&rows, &selection, 4).unwrap();
        assert_eq!(page.items.len(), 4);
        assert!(page.last_evaluated_key.is_some());
    }
}
