//! Compiles predicates, update operations and projections into expression
//! strings, sharing one [`Placeholders`] allocator per request.

use std::collections::{BTreeMap, BTreeSet};

use tablekit_model::types::ReturnValue;
use tablekit_model::{AttributeValue, Key};

use super::compiled::{CompiledRequest, collect_tokens};
use super::path::DocumentPath;
use super::placeholder::Placeholders;
use super::predicate::{FieldCompare, Joiner, MAX_IN_OPERANDS, Operator, Predicate};
use super::update::{Clause, UpdateOp};
use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::schema::{FieldSpec, Schema, TypeHint};
use crate::value::Value;

/// Longest expression string the compiler emits, in bytes.
pub const MAX_EXPRESSION_LENGTH: usize = 4096;

/// The optimistic-lock condition added to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The stored version equals this value.
    Equals(i64),
    /// The item has no version yet.
    Absent,
}

struct Rendered {
    text: String,
    top: Option<Joiner>,
}

/// Incremental compiler for one request.
#[derive(Debug)]
pub struct Compiler<'a> {
    schema: &'a Schema,
    codec: &'a Codec,
    placeholders: Placeholders,
    request: CompiledRequest,
    key_parts: Vec<String>,
    filters: Vec<String>,
    conditions: Vec<String>,
    updates: Vec<(Clause, DocumentPath, String)>,
    update_requested: bool,
}

impl<'a> Compiler<'a> {
    /// Start compiling a request against the schema's table.
    #[must_use]
    pub fn new(schema: &'a Schema, codec: &'a Codec) -> Self {
        Self {
            schema,
            codec,
            placeholders: Placeholders::new(),
            request: CompiledRequest::new(schema.table()),
            key_parts: Vec::new(),
            filters: Vec::new(),
            conditions: Vec::new(),
            updates: Vec::new(),
            update_requested: false,
        }
    }

    // -- request options --

    /// Target a secondary index.
    pub fn index(&mut self, index: Option<&str>) -> Result<()> {
        if let Some(name) = index {
            self.schema.index(name)?;
        }
        self.request.index_name = index.map(str::to_owned);
        Ok(())
    }

    /// Page size.
    pub fn limit(&mut self, limit: Option<usize>) -> Result<()> {
        self.request.limit = limit
            .map(|l| {
                i32::try_from(l)
                    .ok()
                    .filter(|l| *l > 0)
                    .ok_or_else(|| Error::validation(format!("limit {l} is out of range")))
            })
            .transpose()?;
        Ok(())
    }

    /// Start after this key.
    pub fn start_key(&mut self, key: Option<Key>) {
        self.request.exclusive_start_key = key.filter(|k| !k.is_empty());
    }

    /// Sort-key order.
    pub fn forward(&mut self, forward: bool) {
        self.request.scan_index_forward = forward;
    }

    /// Strongly consistent reads.
    pub fn consistent_read(&mut self, consistent: bool) {
        self.request.consistent_read = consistent;
    }

    /// Return counts instead of items.
    pub fn select_count(&mut self, count: bool) {
        self.request.select_count = count;
    }

    /// Parallel scan segment.
    pub fn segment(&mut self, segment: i32, total: i32) {
        self.request.segment = Some((segment, total));
    }

    /// What a write returns.
    pub fn return_values(&mut self, return_values: Option<ReturnValue>) {
        self.request.return_values = return_values;
    }

    // -- read fragments --

    /// Compile `where` clauses. Clauses on the key attributes of the chosen
    /// index (or the table) become the key condition; everything else is
    /// filtered. Returns `true` when a partition-key equality was found, i.e.
    /// the request can be a `Query`.
    pub fn where_clauses(&mut self, clauses: &[FieldCompare]) -> Result<bool> {
        let (pk, sk) = self.schema.keys_for(self.request.index_name.as_deref())?;
        let (pk, sk) = (pk.attribute.clone(), sk.map(|k| k.attribute.clone()));

        let mut partition = None;
        let mut sort = None;
        let mut rest = Vec::new();
        for clause in clauses {
            let path = self.resolve_path(&clause.field)?;
            let simple = path.segments().len() == 1 && !clause.size;
            if simple && path.root() == pk {
                if partition.is_some() {
                    return Err(Error::validation(format!(
                        "partition key `{pk}` is constrained more than once"
                    )));
                }
                partition = Some(clause);
            } else if simple && sk.as_deref() == Some(path.root()) {
                if sort.is_some() {
                    return Err(Error::validation(format!(
                        "sort key `{}` is constrained more than once",
                        path.root()
                    )));
                }
                sort = Some(clause);
            } else {
                rest.push(clause);
            }
        }

        let Some(partition) = partition else {
            self.where_filters(clauses)?;
            return Ok(false);
        };

        if !partition.op.is_key_operator(false) {
            return Err(Error::validation(format!(
                "operator {} is not allowed on partition key `{pk}`",
                partition.op.as_ref()
            )));
        }
        let rendered = self.render_compare(partition, false)?;
        self.key_parts.push(rendered);
        if let Some(sort) = sort {
            if !sort.op.is_key_operator(true) {
                return Err(Error::validation(format!(
                    "operator {} is not allowed on sort key `{}`",
                    sort.op.as_ref(),
                    sk.unwrap_or_default()
                )));
            }
            let rendered = self.render_compare(sort, false)?;
            self.key_parts.push(rendered);
        }
        self.push_where_filter(&rest)?;
        Ok(true)
    }

    /// Compile `where` clauses as filters only, for scans.
    pub fn where_filters(&mut self, clauses: &[FieldCompare]) -> Result<()> {
        let all: Vec<&FieldCompare> = clauses.iter().collect();
        self.push_where_filter(&all)
    }

    /// Compile a filter sequence.
    pub fn filter(&mut self, items: &[(Predicate, Joiner)]) -> Result<()> {
        if let Some(rendered) = self.render_sequence(items)? {
            self.filters.push(rendered.text);
        }
        Ok(())
    }

    /// Compile a projection.
    pub fn projection(&mut self, fields: &[String]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut parts = Vec::with_capacity(fields.len());
        for field in fields {
            let path = self.resolve_path(field)?;
            parts.push(self.placeholders.path(&path));
        }
        self.request.projection = Some(parts.join(", "));
        Ok(())
    }

    // -- write fragments --

    /// Compile a condition sequence.
    pub fn condition(&mut self, items: &[(Predicate, Joiner)]) -> Result<()> {
        if let Some(rendered) = self.render_sequence(items)? {
            self.conditions.push(rendered.text);
        }
        Ok(())
    }

    /// Add a caller-written condition. Its `:name` values must all be
    /// supplied, must all be referenced and must not clash with generated
    /// placeholders.
    pub fn raw_condition(&mut self, expression: &str, values: &BTreeMap<String, Value>) -> Result<()> {
        let mut names = BTreeSet::new();
        let mut referenced = BTreeSet::new();
        collect_tokens(expression, &mut names, &mut referenced);
        if let Some(name) = names.first() {
            return Err(Error::validation(format!(
                "raw condition uses name placeholder `{name}`; reference attributes directly"
            )));
        }
        if let Some(missing) = referenced.iter().find(|v| !values.contains_key(**v)) {
            return Err(Error::validation(format!(
                "raw condition references `{missing}` without a value"
            )));
        }
        for (placeholder, value) in values {
            if !referenced.contains(placeholder.as_str()) {
                return Err(Error::validation(format!(
                    "raw condition value `{placeholder}` is never referenced"
                )));
            }
            let encoded = self.codec.encode(value, None)?;
            self.placeholders.reserve_value(placeholder, encoded)?;
        }
        if !expression.trim().is_empty() {
            self.conditions.push(expression.trim().to_owned());
        }
        Ok(())
    }

    /// Require the item to exist (`true`) or not to exist (`false`).
    pub fn key_exists(&mut self, exists: bool) -> Result<()> {
        let pk = self.schema.partition_key()?.attribute.clone();
        let path = DocumentPath::attribute(&pk)?;
        let p = self.placeholders.path(&path);
        let text = if exists {
            format!("attribute_exists({p})")
        } else {
            format!("attribute_not_exists({p})")
        };
        self.conditions.push(text);
        Ok(())
    }

    /// Add the optimistic-lock condition. No-op without a version field.
    pub fn version_condition(&mut self, check: VersionCheck) -> Result<()> {
        let Some(attribute) = self.schema.version_attribute() else {
            return Ok(());
        };
        let path = DocumentPath::attribute(attribute)?;
        let p = self.placeholders.path(&path);
        let text = match check {
            VersionCheck::Equals(current) => {
                let v = self.placeholders.value(AttributeValue::number(current));
                format!("{p} = {v}")
            }
            VersionCheck::Absent => format!("attribute_not_exists({p})"),
        };
        self.conditions.push(text);
        Ok(())
    }

    /// Compile update operations.
    pub fn update(&mut self, ops: &[UpdateOp]) -> Result<()> {
        self.update_requested = true;
        for op in ops {
            self.update_op(op)?;
        }
        Ok(())
    }

    /// Increment the version attribute. With `initialize`, a missing version
    /// counts as 0. No-op without a version field.
    pub fn version_bump(&mut self, initialize: bool) -> Result<()> {
        self.update_requested = true;
        let Some(attribute) = self.schema.version_attribute() else {
            return Ok(());
        };
        let path = DocumentPath::attribute(attribute)?;
        let p = self.placeholders.path(&path);
        let text = if initialize {
            let zero = self.placeholders.value(AttributeValue::number(0));
            let one = self.placeholders.value(AttributeValue::number(1));
            format!("{p} = if_not_exists({p}, {zero}) + {one}")
        } else {
            let one = self.placeholders.value(AttributeValue::number(1));
            format!("{p} = {p} + {one}")
        };
        self.push_update(Clause::Set, path, text)
    }

    /// SET the update timestamp, unless an operation already targets it.
    pub fn touch_updated_at(&mut self, now: &str) -> Result<()> {
        let Some(attribute) = self.schema.updated_at_attribute() else {
            return Ok(());
        };
        let path = DocumentPath::attribute(attribute)?;
        if self.updates.iter().any(|(_, p, _)| p.overlaps(&path)) {
            return Ok(());
        }
        let p = self.placeholders.path(&path);
        let v = self.placeholders.value(AttributeValue::S(now.to_owned()));
        self.push_update(Clause::Set, path, format!("{p} = {v}"))
    }

    /// Returns `true` if any comparison in `items` targets `attribute`.
    #[must_use]
    pub fn references_attribute(&self, items: &[(Predicate, Joiner)], attribute: &str) -> bool {
        items.iter().any(|(predicate, _)| match predicate {
            Predicate::Compare(c) => {
                self.schema.attribute_name(c.field.split(['.', '[']).next().unwrap_or_default())
                    == attribute
            }
            Predicate::Group(children) => self.references_attribute(children, attribute),
        })
    }

    /// Assemble the request, check placeholder integrity and lengths.
    pub fn finish(mut self) -> Result<CompiledRequest> {
        if !self.key_parts.is_empty() {
            self.request.key_condition = Some(self.key_parts.join(" AND "));
        }
        self.request.filter = merge(&self.filters);
        self.request.condition = merge(&self.conditions);
        if self.update_requested {
            if self.updates.is_empty() {
                return Err(Error::validation("update has no operations"));
            }
            self.request.update = Some(render_updates(&self.updates));
        }
        let (names, values) = self.placeholders.into_maps();
        self.request.names = names;
        self.request.values = values;

        for fragment in self.request.fragments() {
            if fragment.len() > MAX_EXPRESSION_LENGTH {
                return Err(Error::validation(format!(
                    "expression of {} bytes exceeds the {MAX_EXPRESSION_LENGTH}-byte limit",
                    fragment.len()
                )));
            }
        }
        self.request.verify()?;
        Ok(self.request)
    }

    // -- internals --

    fn resolve_path(&self, field: &str) -> Result<DocumentPath> {
        let path = DocumentPath::parse(field)?;
        let root = self.schema.attribute_name(path.root());
        Ok(path.with_root(root))
    }

    fn field_spec(&self, path: &DocumentPath) -> Option<&FieldSpec> {
        if path.segments().len() == 1 {
            self.schema.field_spec(path.root())
        } else {
            None
        }
    }

    fn operand(&mut self, path: &DocumentPath, value: &Value, size: bool) -> Result<String> {
        let spec = if size { None } else { self.field_spec(path) };
        let encoded = self.codec.encode(value, spec)?;
        Ok(self.placeholders.value(encoded))
    }

    fn push_where_filter(&mut self, clauses: &[&FieldCompare]) -> Result<()> {
        let mut parts = Vec::with_capacity(clauses.len());
        for clause in clauses {
            parts.push(self.render_compare(clause, true)?);
        }
        if !parts.is_empty() {
            self.filters.push(parts.join(" AND "));
        }
        Ok(())
    }

    fn render_sequence(&mut self, items: &[(Predicate, Joiner)]) -> Result<Option<Rendered>> {
        let mut out: Option<Rendered> = None;
        for (predicate, joiner) in items {
            let Some(fragment) = self.render_predicate(predicate)? else {
                continue;
            };
            out = Some(match out {
                None => Rendered {
                    text: fragment,
                    top: None,
                },
                Some(acc) => {
                    let text = match acc.top {
                        Some(previous) if previous != *joiner => format!("({})", acc.text),
                        _ => acc.text,
                    };
                    Rendered {
                        text: format!("{text}{}{fragment}", joiner.keyword()),
                        top: Some(*joiner),
                    }
                }
            });
        }
        Ok(out)
    }

    fn render_predicate(&mut self, predicate: &Predicate) -> Result<Option<String>> {
        match predicate {
            Predicate::Compare(compare) => self.render_compare(compare, true).map(Some),
            Predicate::Group(items) => Ok(self
                .render_sequence(items)?
                .map(|rendered| format!("({})", rendered.text))),
        }
    }

    fn render_compare(&mut self, compare: &FieldCompare, allow_omit: bool) -> Result<String> {
        let path = self.resolve_path(&compare.field)?;
        if self.schema.is_encrypted(path.root()) {
            return Err(Error::validation(format!(
                "encrypted field `{}` is not queryable",
                path.root()
            )));
        }

        let omitted = allow_omit
            && !compare.size
            && path.segments().len() == 1
            && self.schema.omits(path.root(), &compare.value);
        let p = self.placeholders.path(&path);
        if omitted {
            match compare.op {
                Operator::Eq => return Ok(format!("attribute_not_exists({p})")),
                Operator::Ne => return Ok(format!("attribute_exists({p})")),
                _ => {}
            }
        }

        let target = if compare.size {
            format!("size({p})")
        } else {
            p.clone()
        };
        let size = compare.size;
        let text = match compare.op {
            Operator::Exists => format!("attribute_exists({p})"),
            Operator::NotExists => format!("attribute_not_exists({p})"),
            Operator::Eq | Operator::Ne | Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
                let v = self.operand(&path, &compare.value, size)?;
                format!("{target} {} {v}", compare.op.as_ref())
            }
            Operator::Between => {
                let bounds = list_operand(&compare.value, "BETWEEN")?;
                let [low, high] = bounds else {
                    return Err(Error::validation(format!(
                        "BETWEEN on `{}` needs exactly 2 values, got {}",
                        compare.field,
                        bounds.len()
                    )));
                };
                let low = self.operand(&path, low, size)?;
                let high = self.operand(&path, high, size)?;
                format!("{target} BETWEEN {low} AND {high}")
            }
            Operator::In => {
                let candidates = list_operand(&compare.value, "IN")?;
                if candidates.is_empty() || candidates.len() > MAX_IN_OPERANDS {
                    return Err(Error::validation(format!(
                        "IN on `{}` needs 1 to {MAX_IN_OPERANDS} values, got {}",
                        compare.field,
                        candidates.len()
                    )));
                }
                let mut rendered = Vec::with_capacity(candidates.len());
                for candidate in candidates {
                    rendered.push(self.operand(&path, candidate, size)?);
                }
                format!("{target} IN ({})", rendered.join(", "))
            }
            Operator::BeginsWith | Operator::Contains | Operator::NotContains => {
                if size {
                    return Err(Error::validation(format!(
                        "{} cannot be applied to size(`{}`)",
                        compare.op.as_ref(),
                        compare.field
                    )));
                }
                let v = self.operand_scalar(&compare.value)?;
                match compare.op {
                    Operator::BeginsWith => format!("begins_with({p}, {v})"),
                    Operator::Contains => format!("contains({p}, {v})"),
                    _ => format!("NOT contains({p}, {v})"),
                }
            }
        };
        Ok(text)
    }

    fn operand_scalar(&mut self, value: &Value) -> Result<String> {
        let encoded = self.codec.encode(value, None)?;
        Ok(self.placeholders.value(encoded))
    }

    fn update_op(&mut self, op: &UpdateOp) -> Result<()> {
        let base = self.resolve_path(op.field())?;
        if base.segments().len() == 1 && self.schema.is_key_attribute(base.root()) {
            return Err(Error::validation(format!(
                "key attribute `{}` cannot be updated",
                base.root()
            )));
        }
        let encrypted = self.schema.is_encrypted(base.root());
        let path = match op.index() {
            Some(index) => base.clone().index(index),
            None => base.clone(),
        };
        let p = self.placeholders.path(&path);

        let text = match op {
            UpdateOp::Set { value, .. } => {
                let v = self.field_value(&path, value)?;
                format!("{p} = {v}")
            }
            UpdateOp::SetIfNotExists { value, .. } => {
                let v = self.field_value(&path, value)?;
                format!("{p} = if_not_exists({p}, {v})")
            }
            UpdateOp::SetListElement { value, .. } => {
                let v = self.field_value(&path, value)?;
                format!("{p} = {v}")
            }
            UpdateOp::Remove(_) | UpdateOp::RemoveFromListAt { .. } => p.clone(),
            _ if encrypted => {
                return Err(Error::validation(format!(
                    "encrypted field `{}` only supports SET and REMOVE",
                    base.root()
                )));
            }
            UpdateOp::Add { delta, .. } => {
                let v = self.operand(&path, delta, false)?;
                format!("{p} {v}")
            }
            UpdateOp::Increment(_) => {
                let v = self.placeholders.value(AttributeValue::number(1));
                format!("{p} {v}")
            }
            UpdateOp::Decrement(_) => {
                let v = self.placeholders.value(AttributeValue::number(-1));
                format!("{p} {v}")
            }
            UpdateOp::DeleteFromSet { value, .. } => {
                let promoted = promote_to_set(value);
                let spec = FieldSpec {
                    hint: TypeHint::Set,
                    ..FieldSpec::default()
                };
                let encoded = self.codec.encode(&promoted, Some(&spec))?;
                if !encoded.is_set() {
                    return Err(Error::validation(format!(
                        "DELETE on `{}` needs set members",
                        base.root()
                    )));
                }
                let v = self.placeholders.value(encoded);
                format!("{p} {v}")
            }
            UpdateOp::AppendToList { values, .. } | UpdateOp::PrependToList { values, .. } => {
                let list = self.codec.encode(&Value::List(values.clone()), None)?;
                let v = self.placeholders.value(list);
                if matches!(op, UpdateOp::AppendToList { .. }) {
                    format!("{p} = list_append({p}, {v})")
                } else {
                    format!("{p} = list_append({v}, {p})")
                }
            }
        };
        self.push_update(op.clause(), path, text)
    }

    fn field_value(&mut self, path: &DocumentPath, value: &Value) -> Result<String> {
        let encoded = if path.segments().len() == 1 {
            self.codec.encode_field(self.schema, path.root(), value)?
        } else {
            self.codec.encode(value, None)?
        };
        Ok(self.placeholders.value(encoded))
    }

    fn push_update(&mut self, clause: Clause, path: DocumentPath, text: String) -> Result<()> {
        if let Some((other, existing, _)) = self.updates.iter().find(|(_, p, _)| p.overlaps(&path)) {
            let message = if *other == clause {
                format!(
                    "path `{path}` overlaps `{existing}` within the {} clause",
                    clause.keyword()
                )
            } else {
                format!(
                    "path `{path}` appears in both {} and {}",
                    other.keyword(),
                    clause.keyword()
                )
            };
            return Err(Error::validation(message));
        }
        self.updates.push((clause, path, text));
        Ok(())
    }
}

fn list_operand<'v>(value: &'v Value, op: &str) -> Result<&'v [Value]> {
    value
        .as_list()
        .ok_or_else(|| Error::validation(format!("{op} needs a list of values")))
}

fn promote_to_set(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::StringSet(vec![s.clone()]),
        Value::Number(n) => Value::NumberSet(vec![n.clone()]),
        Value::Binary(b) => Value::BinarySet(vec![b.clone()]),
        other => other.clone(),
    }
}

fn merge(parts: &[String]) -> Option<String> {
    match parts {
        [] => None,
        [single] => Some(single.clone()),
        many => Some(
            many.iter()
                .map(|p| format!("({p})"))
                .collect::<Vec<_>>()
                .join(" AND "),
        ),
    }
}

fn render_updates(updates: &[(Clause, DocumentPath, String)]) -> String {
    Clause::ORDER
        .iter()
        .filter_map(|clause| {
            let entries: Vec<&str> = updates
                .iter()
                .filter(|(c, _, _)| c == clause)
                .map(|(_, _, text)| text.as_str())
                .collect();
            (!entries.is_empty()).then(|| format!("{} {}", clause.keyword(), entries.join(", ")))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use tablekit_model::types::ScalarAttributeType;

    use super::*;
    use crate::error::ErrorKind;
    use crate::expr::predicate::GroupBuilder;
    use crate::schema::IndexSpec;

    fn schema() -> Schema {
        Schema::builder("orders")
            .partition_key("customer_id", ScalarAttributeType::S)
            .sort_key("order_id", ScalarAttributeType::S)
            .index(IndexSpec::global("by_status", "status", ScalarAttributeType::S))
            .field(FieldSpec::new("nickname").omit_empty())
            .field(FieldSpec::new("card").encrypted())
            .field(FieldSpec::new("tags").set())
            .version_field("version")
            .updated_at("updated_at")
            .build()
    }

    fn cmp(field: &str, op: Operator, value: impl Into<Value>) -> FieldCompare {
        FieldCompare::new(field, op, value)
    }

    #[test]
    fn test_should_compile_key_condition_and_filter() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let is_query = c
            .where_clauses(&[
                cmp("customer_id", Operator::Eq, "c1"),
                cmp("order_id", Operator::BeginsWith, "2024-"),
                cmp("total", Operator::Gt, 10),
            ])
            .unwrap();
        assert!(is_query);
        let req = c.finish().unwrap();
        assert_eq!(
            req.key_condition.as_deref(),
            Some("#n1 = :v1 AND begins_with(#n2, :v2)")
        );
        assert_eq!(req.filter.as_deref(), Some("#n3 > :v3"));
        assert_eq!(req.names["#n3"], "total");
    }

    #[test]
    fn test_should_fall_back_to_filter_without_partition_key() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        assert!(!c.where_clauses(&[cmp("order_id", Operator::Ne, "x")]).unwrap());
        let req = c.finish().unwrap();
        assert!(req.key_condition.is_none());
        assert_eq!(req.filter.as_deref(), Some("#n1 <> :v1"));
    }

    #[test]
    fn test_should_reject_invalid_key_operators() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let err = c
            .where_clauses(&[
                cmp("customer_id", Operator::Eq, "c1"),
                cmp("order_id", Operator::Ne, "x"),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let mut c = Compiler::new(&schema, &codec);
        assert!(c
            .where_clauses(&[cmp("customer_id", Operator::Gt, "c1")])
            .is_err());
    }

    #[test]
    fn test_should_use_index_keys() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.index(Some("by_status")).unwrap();
        assert!(c.where_clauses(&[cmp("status", Operator::Eq, "PAID")]).unwrap());
        let req = c.finish().unwrap();
        assert_eq!(req.index_name.as_deref(), Some("by_status"));
        assert_eq!(req.key_condition.as_deref(), Some("#n1 = :v1"));
    }

    #[test]
    fn test_should_render_groups_in_declared_order() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let group = GroupBuilder::default()
            .filter("status", "=", "PAID")
            .or_filter("status", "=", "SHIPPED")
            .filter("total", ">", 5)
            .build()
            .unwrap();
        c.filter(&[(group, Joiner::And)]).unwrap();
        let req = c.finish().unwrap();
        assert_eq!(
            req.filter.as_deref(),
            Some("((#n1 = :v1 OR #n1 = :v2) AND #n2 > :v3)")
        );
    }

    #[test]
    fn test_should_render_function_operators() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.filter(&[
            (cmp("total", Operator::Between, vec![1, 9]).into(), Joiner::And),
            (cmp("status", Operator::In, vec!["A", "B"]).into(), Joiner::And),
            (cmp("tags", Operator::NotContains, "x").into(), Joiner::Or),
            (FieldCompare::size("tags", Operator::Ge, 2).into(), Joiner::Or),
            (cmp("note", Operator::NotExists, Value::Null).into(), Joiner::And),
        ])
        .unwrap();
        let req = c.finish().unwrap();
        assert_eq!(
            req.filter.as_deref(),
            Some(
                "((#n1 BETWEEN :v1 AND :v2 AND #n2 IN (:v3, :v4)) OR NOT contains(#n3, :v5) OR size(#n3) >= :v6) AND attribute_not_exists(#n4)"
            )
        );
    }

    #[test]
    fn test_should_map_omit_empty_comparisons_to_existence() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.filter(&[
            (cmp("nickname", Operator::Eq, "").into(), Joiner::And),
            (cmp("nickname", Operator::Ne, "").into(), Joiner::Or),
        ])
        .unwrap();
        let req = c.finish().unwrap();
        assert_eq!(
            req.filter.as_deref(),
            Some("attribute_not_exists(#n1) OR attribute_exists(#n1)")
        );
        assert!(req.values.is_empty());
    }

    #[test]
    fn test_should_reject_encrypted_predicates() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let err = c
            .filter(&[(cmp("card", Operator::Eq, "4111").into(), Joiner::And)])
            .unwrap_err();
        assert!(err.to_string().contains("not queryable"));
    }

    #[test]
    fn test_should_validate_in_and_between_arity() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        assert!(c
            .filter(&[(cmp("total", Operator::Between, vec![1]).into(), Joiner::And)])
            .is_err());
        let many: Vec<i32> = (0..101).collect();
        assert!(c
            .filter(&[(cmp("total", Operator::In, many).into(), Joiner::And)])
            .is_err());
    }

    #[test]
    fn test_should_emit_update_clauses_in_fixed_order() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.update(&[
            UpdateOp::DeleteFromSet {
                field: "tags".to_owned(),
                value: Value::from("old"),
            },
            UpdateOp::Increment("views".to_owned()),
            UpdateOp::Remove("draft".to_owned()),
            UpdateOp::Set {
                field: "status".to_owned(),
                value: Value::from("PAID"),
            },
            UpdateOp::AppendToList {
                field: "history".to_owned(),
                values: vec![Value::from("paid")],
            },
            UpdateOp::RemoveFromListAt {
                field: "items".to_owned(),
                index: 2,
            },
        ])
        .unwrap();
        c.version_bump(false).unwrap();
        c.version_condition(VersionCheck::Equals(3)).unwrap();
        c.touch_updated_at("2024-01-01T00:00:00Z").unwrap();
        let req = c.finish().unwrap();
        assert_eq!(
            req.update.as_deref(),
            Some(
                "SET #n4 = :v3, #n5 = list_append(#n5, :v4), #n7 = #n7 + :v5, #n8 = :v7 REMOVE #n3, #n6[2] ADD #n2 :v2 DELETE #n1 :v1"
            )
        );
        assert_eq!(req.condition.as_deref(), Some("#n7 = :v6"));
        assert_eq!(req.values[":v1"], AttributeValue::Ss(vec!["old".to_owned()]));
        assert_eq!(req.values[":v6"], AttributeValue::number(3));
        req.verify().unwrap();
    }

    #[test]
    fn test_should_reject_conflicting_paths() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let err = c
            .update(&[
                UpdateOp::Set {
                    field: "a".to_owned(),
                    value: Value::from(1),
                },
                UpdateOp::Remove("a".to_owned()),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("both SET and REMOVE"));

        let mut c = Compiler::new(&schema, &codec);
        assert!(c
            .update(&[
                UpdateOp::Set {
                    field: "a.b".to_owned(),
                    value: Value::from(1),
                },
                UpdateOp::Set {
                    field: "a".to_owned(),
                    value: Value::from(2),
                },
            ])
            .is_err());
    }

    #[test]
    fn test_should_reject_empty_update_and_key_updates() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.update(&[]).unwrap();
        assert!(c.finish().is_err());

        let mut c = Compiler::new(&schema, &codec);
        assert!(c
            .update(&[UpdateOp::Set {
                field: "customer_id".to_owned(),
                value: Value::from("x"),
            }])
            .is_err());
    }

    #[test]
    fn test_should_merge_raw_condition_values() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.condition(&[(cmp("status", Operator::Eq, "PAID").into(), Joiner::And)])
            .unwrap();
        c.raw_condition(
            "balance >= :min",
            &BTreeMap::from([(":min".to_owned(), Value::from(10))]),
        )
        .unwrap();
        let req = c.finish().unwrap();
        assert_eq!(
            req.condition.as_deref(),
            Some("(#n1 = :v1) AND (balance >= :min)")
        );

        let mut c = Compiler::new(&schema, &codec);
        c.condition(&[(cmp("status", Operator::Eq, "PAID").into(), Joiner::And)])
            .unwrap();
        assert!(c
            .raw_condition("x = :v1", &BTreeMap::from([(":v1".to_owned(), Value::from(1))]))
            .is_err());
        assert!(c.raw_condition("x = :missing", &BTreeMap::new()).is_err());
        assert!(c
            .raw_condition("x = :a", &BTreeMap::from([
                (":a".to_owned(), Value::from(1)),
                (":b".to_owned(), Value::from(2)),
            ]))
            .is_err());
    }

    #[test]
    fn test_should_reject_over_long_expressions() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        let fields: Vec<String> = (0..400).map(|i| format!("attribute_{i:04}")).collect();
        let ops: Vec<UpdateOp> = fields
            .iter()
            .map(|f| UpdateOp::Set {
                field: f.clone(),
                value: Value::from(1),
            })
            .collect();
        c.update(&ops).unwrap();
        let err = c.finish().unwrap_err();
        assert!(err.to_string().contains("4096"));
    }

    #[test]
    fn test_should_project_nested_paths() {
        let schema = schema();
        let codec = Codec::new();
        let mut c = Compiler::new(&schema, &codec);
        c.projection(&["status".to_owned(), "address.city".to_owned()])
            .unwrap();
        let req = c.finish().unwrap();
        assert_eq!(req.projection.as_deref(), Some("#n1, #n2.#n3"));
    }
}
