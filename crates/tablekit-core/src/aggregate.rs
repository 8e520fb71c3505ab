//! Client-side aggregates over the records a [`Query`] reads.
//!
//! Every aggregate reads the matching items the way [`Query::all`] does
//! (limit, offset and read retries included) and folds them locally. Missing
//! and null values are left out. Numbers compare numerically and strings
//! lexicographically; values of different types are never ordered against
//! each other, so the first one seen is kept.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tablekit_model::Item;
use tracing::{debug, instrument};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::expr::{IntoOperator, Operator};
use crate::query::Query;
use crate::schema::{Record, Schema};
use crate::value::Value;

/// The `having` name of a group's record count.
pub const GROUP_COUNT: &str = "COUNT(*)";

/// Summary of one field over the matching records.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    /// Matching records, whether or not they carry the field.
    pub count: usize,
    /// Sum of the numeric values.
    pub sum: f64,
    /// Mean of the numeric values; zero when there are none.
    pub average: f64,
    /// Smallest value, if any record carries the field.
    pub min: Option<Value>,
    /// Largest value, if any record carries the field.
    pub max: Option<Value>,
}

/// One group of [`GroupBy::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct Group<T> {
    /// The grouped field's value.
    pub key: Value,
    /// Records in the group.
    pub count: usize,
    /// Requested aggregates by alias. Counts, sums and averages are numbers;
    /// a min or max over no values is [`Value::Null`].
    pub aggregates: BTreeMap<String, Value>,
    /// The records themselves, in read order.
    pub items: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Count,
    Sum,
    Average,
    Min,
    Max,
}

#[derive(Debug, Clone)]
struct Aggregate {
    function: Function,
    field: String,
    alias: String,
}

/// Groups the matching records by one field. Built by [`Query::group_by`].
pub struct GroupBy<'c, T> {
    query: Query<'c, T>,
    field: String,
    aggregates: Vec<Aggregate>,
    having: Vec<(String, Operator, f64)>,
    error: Option<Error>,
}

impl<T: Record> fmt::Debug for GroupBy<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupBy")
            .field("query", &self.query)
            .field("field", &self.field)
            .field("aggregates", &self.aggregates)
            .field("having", &self.having)
            .finish_non_exhaustive()
    }
}

impl<'c, T: Record> Query<'c, T> {
    /// Sum of the numeric values of `field`. Non-numeric values are skipped.
    #[instrument(skip_all, fields(table = %self.table(), operation = "sum"))]
    pub async fn sum(mut self, field: &str) -> Result<f64> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        let (sum, _) = numeric(&values(self.client.codec(), &schema, &items, field)?);
        Ok(sum)
    }

    /// Mean of the numeric values of `field`, or zero when there are none.
    #[instrument(skip_all, fields(table = %self.table(), operation = "average"))]
    pub async fn average(mut self, field: &str) -> Result<f64> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        let (sum, count) = numeric(&values(self.client.codec(), &schema, &items, field)?);
        Ok(mean(sum, count))
    }

    /// Smallest value of `field`. [`Error::ItemNotFound`] when no matching
    /// record carries it.
    pub async fn min(self, field: &str) -> Result<Value> {
        self.extreme(field, Ordering::Less).await
    }

    /// Largest value of `field`. [`Error::ItemNotFound`] when no matching
    /// record carries it.
    pub async fn max(self, field: &str) -> Result<Value> {
        self.extreme(field, Ordering::Greater).await
    }

    /// Number of distinct values of `field`.
    #[instrument(skip_all, fields(table = %self.table(), operation = "count_distinct"))]
    pub async fn count_distinct(mut self, field: &str) -> Result<usize> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        let distinct: HashSet<String> = values(self.client.codec(), &schema, &items, field)?
            .iter()
            .map(group_key)
            .collect();
        Ok(distinct.len())
    }

    /// Count, sum, average, min and max of `field` in one read.
    #[instrument(skip_all, fields(table = %self.table(), operation = "aggregate"))]
    pub async fn aggregate(mut self, field: &str) -> Result<AggregateResult> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        let found = values(self.client.codec(), &schema, &items, field)?;
        let (sum, count) = numeric(&found);
        Ok(AggregateResult {
            count: items.len(),
            sum,
            average: mean(sum, count),
            min: extreme(found.iter().cloned(), Ordering::Less),
            max: extreme(found.into_iter(), Ordering::Greater),
        })
    }

    /// Group the matching records by `field`.
    #[must_use]
    pub fn group_by(self, field: &str) -> GroupBy<'c, T> {
        GroupBy {
            query: self,
            field: field.to_owned(),
            aggregates: Vec::new(),
            having: Vec::new(),
            error: None,
        }
    }

    async fn extreme(mut self, field: &str, wanted: Ordering) -> Result<Value> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        let found = values(self.client.codec(), &schema, &items, field)?;
        extreme(found.into_iter(), wanted).ok_or(Error::ItemNotFound)
    }
}

impl<T: Record> GroupBy<'_, T> {
    /// Record count per group under `alias`.
    #[must_use]
    pub fn count(self, alias: &str) -> Self {
        self.push(Function::Count, "", alias)
    }

    /// Sum of `field` per group under `alias`.
    #[must_use]
    pub fn sum(self, field: &str, alias: &str) -> Self {
        self.push(Function::Sum, field, alias)
    }

    /// Mean of `field` per group under `alias`.
    #[must_use]
    pub fn average(self, field: &str, alias: &str) -> Self {
        self.push(Function::Average, field, alias)
    }

    /// Smallest `field` per group under `alias`.
    #[must_use]
    pub fn min(self, field: &str, alias: &str) -> Self {
        self.push(Function::Min, field, alias)
    }

    /// Largest `field` per group under `alias`.
    #[must_use]
    pub fn max(self, field: &str, alias: &str) -> Self {
        self.push(Function::Max, field, alias)
    }

    /// Keep only groups whose aggregate `alias` (or [`GROUP_COUNT`])
    /// compares true against `value`. Groups whose aggregate is missing or
    /// not a number are dropped.
    #[must_use]
    pub fn having(mut self, alias: &str, op: impl IntoOperator, value: f64) -> Self {
        match op.into_operator() {
            Ok(
                op @ (Operator::Eq
                | Operator::Ne
                | Operator::Lt
                | Operator::Le
                | Operator::Gt
                | Operator::Ge),
            ) => self.having.push((alias.to_owned(), op, value)),
            Ok(op) => {
                self.error.get_or_insert(Error::validation(format!(
                    "operator {op:?} cannot compare an aggregate"
                )));
            }
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    /// Read, group and filter. Groups are ordered by key.
    #[instrument(skip_all, fields(table = %self.query.table(), operation = "group_by"))]
    pub async fn execute(mut self) -> Result<Vec<Group<T>>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let schema = self.query.prepare()?;
        let items = self.query.read_all(&schema).await?;
        let codec = self.query.client.codec();
        let attribute = schema.attribute_name(&self.field);

        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut buckets: Vec<(Value, Vec<Item>)> = Vec::new();
        for item in items {
            let Some(raw) = item.get(&attribute) else {
                continue;
            };
            let key = codec.decode_field(&schema, &attribute, raw)?;
            if key == Value::Null {
                continue;
            }
            match slots.get(&group_key(&key)) {
                Some(&slot) => buckets[slot].1.push(item),
                None => {
                    slots.insert(group_key(&key), buckets.len());
                    buckets.push((key, vec![item]));
                }
            }
        }
        buckets.sort_by(|(a, _), (b, _)| {
            compare(a, b).unwrap_or_else(|| group_key(a).cmp(&group_key(b)))
        });

        let mut groups = Vec::with_capacity(buckets.len());
        for (key, items) in buckets {
            let mut aggregates = BTreeMap::new();
            for aggregate in &self.aggregates {
                let value = self.evaluate(codec, &schema, &items, aggregate)?;
                aggregates.insert(aggregate.alias.clone(), value);
            }
            let count = items.len();
            if !self.keeps(count, &aggregates) {
                continue;
            }
            let items = items
                .into_iter()
                .map(|item| self.query.decode(&schema, item))
                .collect::<Result<Vec<_>>>()?;
            groups.push(Group {
                key,
                count,
                aggregates,
                items,
            });
        }
        debug!(groups = groups.len(), field = %self.field, "grouped records");
        Ok(groups)
    }

    fn push(mut self, function: Function, field: &str, alias: &str) -> Self {
        self.aggregates.push(Aggregate {
            function,
            field: field.to_owned(),
            alias: alias.to_owned(),
        });
        self
    }

    fn evaluate(
        &self,
        codec: &Codec,
        schema: &Schema,
        items: &[Item],
        aggregate: &Aggregate,
    ) -> Result<Value> {
        let found = || values(codec, schema, items, &aggregate.field);
        Ok(match aggregate.function {
            Function::Count => Value::number(items.len()),
            Function::Sum => Value::number(numeric(&found()?).0),
            Function::Average => {
                let (sum, count) = numeric(&found()?);
                Value::number(mean(sum, count))
            }
            Function::Min => extreme(found()?.into_iter(), Ordering::Less).unwrap_or(Value::Null),
            Function::Max => {
                extreme(found()?.into_iter(), Ordering::Greater).unwrap_or(Value::Null)
            }
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn keeps(&self, count: usize, aggregates: &BTreeMap<String, Value>) -> bool {
        self.having.iter().all(|(alias, op, expected)| {
            let actual = if alias == GROUP_COUNT {
                Some(count as f64)
            } else {
                aggregates.get(alias).and_then(as_f64)
            };
            let Some(actual) = actual else {
                return false;
            };
            match op {
                Operator::Eq => (actual - expected).abs() < f64::EPSILON,
                Operator::Ne => (actual - expected).abs() >= f64::EPSILON,
                Operator::Lt => actual < *expected,
                Operator::Le => actual <= *expected,
                Operator::Gt => actual > *expected,
                Operator::Ge => actual >= *expected,
                _ => false,
            }
        })
    }
}

/// Decoded values of `field`, missing and null ones left out.
fn values(codec: &Codec, schema: &Schema, items: &[Item], field: &str) -> Result<Vec<Value>> {
    let attribute = schema.attribute_name(field);
    let mut found = Vec::with_capacity(items.len());
    for raw in items.iter().filter_map(|item| item.get(&attribute)) {
        let value = codec.decode_field(schema, &attribute, raw)?;
        if value != Value::Null {
            found.push(value);
        }
    }
    Ok(found)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.parse().ok(),
        _ => None,
    }
}

/// Sum and count of the numeric values.
fn numeric(values: &[Value]) -> (f64, usize) {
    values
        .iter()
        .filter_map(as_f64)
        .fold((0.0, 0), |(sum, count), n| (sum + n, count + 1))
}

#[allow(clippy::cast_precision_loss)]
fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => as_f64(a)?.partial_cmp(&as_f64(b)?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn extreme(values: impl Iterator<Item = Value>, wanted: Ordering) -> Option<Value> {
    values.fold(None, |best, value| match best {
        Some(best) if compare(&value, &best) != Some(wanted) => Some(best),
        _ => Some(value),
    })
}

/// Identity of a value for grouping; distinguishes `"1"` from `1`.
fn group_key(value: &Value) -> String {
    match value {
        Value::String(s) => format!("s:{s}"),
        Value::Number(n) => {
            let n = as_f64(value).map_or_else(|| n.clone(), |f| f.to_string());
            format!("n:{n}")
        }
        other => format!("{other:?}"),
    }
}
