//! Fine-grained updates: [`UpdateSpec`] collects operations and conditions,
//! [`UpdateOps`] is the fluent surface shared by [`UpdateBuilder`] and
//! transactional updates.

use std::collections::BTreeMap;
use std::fmt;

use tablekit_model::types::ReturnValue;
use tablekit_model::{Item, Key};
use tracing::{debug, instrument};

use crate::error::{Error, Result};
use crate::expr::{Compiler, FieldCompare, IntoOperator, Joiner, Operator, Predicate, UpdateOp, VersionCheck};
use crate::item::{key_from_conditions, timestamp};
use crate::query::Query;
use crate::schema::{Record, Schema};
use crate::value::Value;

/// Decoded attributes returned by a write, keyed by field name.
pub type Attributes = BTreeMap<String, Value>;

/// Operations and conditions of one update.
#[derive(Debug, Default)]
pub struct UpdateSpec {
    ops: Vec<UpdateOp>,
    conditions: Vec<(Predicate, Joiner)>,
    expected_version: Option<i64>,
    error: Option<Error>,
}

impl UpdateSpec {
    /// An empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_ops(ops: Vec<UpdateOp>) -> Self {
        Self {
            ops,
            ..Self::default()
        }
    }

    /// The collected operations.
    #[must_use]
    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    /// Compile into `compiler`, adding the version condition and bump.
    ///
    /// `known` is the version the caller last read, `fallback` the check used
    /// when no version is known (`None` bumps without a guard), and
    /// `suppressed` is set when the caller already conditions on the version
    /// attribute.
    pub(crate) fn apply(
        self,
        compiler: &mut Compiler<'_>,
        schema: &Schema,
        known: Option<i64>,
        fallback: Option<VersionCheck>,
        suppressed: bool,
    ) -> Result<()> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.ops.is_empty() && schema.version_attribute().is_none() {
            return Err(Error::validation("update has no operations"));
        }
        compiler.update(&self.ops)?;
        compiler.condition(&self.conditions)?;

        if let Some(attribute) = schema.version_attribute() {
            if suppressed || compiler.references_attribute(&self.conditions, attribute) {
                compiler.version_bump(true)?;
            } else if let Some(current) = self.expected_version.or(known) {
                compiler.version_condition(VersionCheck::Equals(current))?;
                compiler.version_bump(false)?;
            } else {
                if let Some(check) = fallback {
                    compiler.version_condition(check)?;
                }
                compiler.version_bump(true)?;
            }
        }
        compiler.touch_updated_at(&timestamp())
    }

    fn push(&mut self, op: UpdateOp) {
        self.ops.push(op);
    }

    fn push_condition(&mut self, field: &str, op: impl IntoOperator, value: Value, joiner: Joiner) {
        match op.into_operator() {
            Ok(op) => self
                .conditions
                .push((Predicate::Compare(FieldCompare::new(field, op, value)), joiner)),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
    }
}

/// Fluent update operations.
pub trait UpdateOps: Sized {
    /// The spec being built.
    fn spec_mut(&mut self) -> &mut UpdateSpec;

    /// `SET field = value`.
    #[must_use]
    fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.spec_mut().push(UpdateOp::Set {
            field: field.to_owned(),
            value: value.into(),
        });
        self
    }

    /// `SET field = if_not_exists(field, value)`.
    #[must_use]
    fn set_if_not_exists(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.spec_mut().push(UpdateOp::SetIfNotExists {
            field: field.to_owned(),
            value: value.into(),
        });
        self
    }

    /// `ADD field delta` on a number or set.
    #[must_use]
    fn add(mut self, field: &str, delta: impl Into<Value>) -> Self {
        self.spec_mut().push(UpdateOp::Add {
            field: field.to_owned(),
            delta: delta.into(),
        });
        self
    }

    /// `ADD field 1`.
    #[must_use]
    fn increment(mut self, field: &str) -> Self {
        self.spec_mut().push(UpdateOp::Increment(field.to_owned()));
        self
    }

    /// `ADD field -1`.
    #[must_use]
    fn decrement(mut self, field: &str) -> Self {
        self.spec_mut().push(UpdateOp::Decrement(field.to_owned()));
        self
    }

    /// `REMOVE field`.
    #[must_use]
    fn remove(mut self, field: &str) -> Self {
        self.spec_mut().push(UpdateOp::Remove(field.to_owned()));
        self
    }

    /// `DELETE field members`.
    #[must_use]
    fn delete_from_set(mut self, field: &str, members: impl Into<Value>) -> Self {
        self.spec_mut().push(UpdateOp::DeleteFromSet {
            field: field.to_owned(),
            value: members.into(),
        });
        self
    }

    /// Append elements to a list.
    #[must_use]
    fn append_to_list<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.spec_mut().push(UpdateOp::AppendToList {
            field: field.to_owned(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Prepend elements to a list.
    #[must_use]
    fn prepend_to_list<V: Into<Value>>(
        mut self,
        field: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.spec_mut().push(UpdateOp::PrependToList {
            field: field.to_owned(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// `REMOVE field[index]`.
    #[must_use]
    fn remove_from_list_at(mut self, field: &str, index: usize) -> Self {
        self.spec_mut().push(UpdateOp::RemoveFromListAt {
            field: field.to_owned(),
            index,
        });
        self
    }

    /// `SET field[index] = value`.
    #[must_use]
    fn set_list_element(mut self, field: &str, index: usize, value: impl Into<Value>) -> Self {
        self.spec_mut().push(UpdateOp::SetListElement {
            field: field.to_owned(),
            index,
            value: value.into(),
        });
        self
    }

    /// `AND field op value` condition.
    #[must_use]
    fn condition(mut self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.spec_mut()
            .push_condition(field, op, value.into(), Joiner::And);
        self
    }

    /// `OR field op value` condition.
    #[must_use]
    fn or_condition(mut self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.spec_mut()
            .push_condition(field, op, value.into(), Joiner::Or);
        self
    }

    /// Require the field to exist.
    #[must_use]
    fn condition_exists(mut self, field: &str) -> Self {
        self.spec_mut()
            .push_condition(field, Operator::Exists, Value::Null, Joiner::And);
        self
    }

    /// Require the field to be absent.
    #[must_use]
    fn condition_not_exists(mut self, field: &str) -> Self {
        self.spec_mut()
            .push_condition(field, Operator::NotExists, Value::Null, Joiner::And);
        self
    }

    /// Require the stored version to equal `version`.
    #[must_use]
    fn condition_version(mut self, version: i64) -> Self {
        self.spec_mut().expected_version = Some(version);
        self
    }
}

impl UpdateOps for UpdateSpec {
    fn spec_mut(&mut self) -> &mut UpdateSpec {
        self
    }
}

/// An update of the item named by a query's key conditions.
pub struct UpdateBuilder<'c, T> {
    query: Query<'c, T>,
    spec: UpdateSpec,
    return_values: Option<ReturnValue>,
}

impl<T: Record> fmt::Debug for UpdateBuilder<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBuilder")
            .field("query", &self.query)
            .field("spec", &self.spec)
            .field("return_values", &self.return_values)
            .finish()
    }
}

impl<T> UpdateOps for UpdateBuilder<'_, T> {
    fn spec_mut(&mut self) -> &mut UpdateSpec {
        &mut self.spec
    }
}

impl<'c, T: Record> UpdateBuilder<'c, T> {
    pub(crate) fn new(query: Query<'c, T>) -> Self {
        Self {
            query,
            spec: UpdateSpec::new(),
            return_values: None,
        }
    }

    /// What the write returns.
    #[must_use]
    pub fn return_values(mut self, return_values: ReturnValue) -> Self {
        self.return_values = Some(return_values);
        self
    }

    /// Run the update. Returns the decoded attributes the return-values
    /// option asked for.
    #[instrument(skip_all, fields(table = %self.query.table(), operation = "update"))]
    pub async fn execute(self) -> Result<Option<Attributes>> {
        let Self {
            mut query,
            spec,
            return_values,
        } = self;
        let schema = query.prepare()?;
        let key = key_from_conditions(&schema, query.client.codec(), &query.conditions)?
            .ok_or_else(|| {
                Error::validation("update needs an equality condition on every key attribute")
            })?;
        let attributes = query
            .run_update(&schema, key, spec, return_values, None)
            .await?;
        attributes
            .map(|item| decode_attributes(&query, &schema, item))
            .transpose()
    }

    /// Run the update and decode the stored record as it is afterwards.
    pub async fn execute_record(mut self) -> Result<T> {
        self.return_values = Some(ReturnValue::AllNew);
        let mut query = self.query;
        let schema = query.prepare()?;
        let key = key_from_conditions(&schema, query.client.codec(), &query.conditions)?
            .ok_or_else(|| {
                Error::validation("update needs an equality condition on every key attribute")
            })?;
        let item = query
            .run_update(&schema, key, self.spec, self.return_values, None)
            .await?
            .ok_or(Error::ItemNotFound)?;
        query.decode(&schema, item)
    }
}

fn decode_attributes<T: Record>(query: &Query<'_, T>, schema: &Schema, item: Item) -> Result<Attributes> {
    let codec = query.client.codec();
    item.iter()
        .map(|(attribute, value)| {
            Ok((
                schema.field_name(attribute),
                codec.decode_field(schema, attribute, value)?,
            ))
        })
        .collect()
}

impl<T: Record> Query<'_, T> {
    /// Compile and send one `UpdateItem`. Builder conditions come before the
    /// query's own write conditions.
    pub(crate) async fn run_update(
        &self,
        schema: &Schema,
        key: Key,
        spec: UpdateSpec,
        return_values: Option<ReturnValue>,
        known: Option<i64>,
    ) -> Result<Option<Item>> {
        let mut compiler = Compiler::new(schema, self.client.codec());
        compiler.return_values(return_values);
        let suppressed = schema
            .version_attribute()
            .is_some_and(|a| compiler.references_attribute(&self.write_conditions, a));
        spec.apply(&mut compiler, schema, known, None, suppressed)?;
        self.apply_conditions(&mut compiler)?;
        let request = compiler.finish()?;

        debug!(
            update = request.update.as_deref().unwrap_or_default(),
            condition = request.condition.as_deref().unwrap_or_default(),
            "updating item"
        );
        let input = request.into_update_input(key);
        let output = self
            .client
            .send(&self.token, || self.client.transport().update_item(input.clone()))
            .await?;
        Ok(output.attributes.filter(|item| !item.is_empty()))
    }
}
