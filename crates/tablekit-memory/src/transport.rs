//! [`Transport`] implementation backed by in-process tables.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use tablekit_core::Transport;
use tablekit_core::schema::Record;
use tablekit_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, TransactWriteItemsInput, UpdateItemInput,
};
use tablekit_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, TransactWriteItemsOutput, UpdateItemOutput,
};
use tablekit_model::types::{
    CancellationReason, ExpressionAttributeNames, ExpressionAttributeValues, KeysAndAttributes,
    ReturnValue, ReturnValuesOnConditionCheckFailure, Select, WriteRequest,
};
use tablekit_model::{Item, Key, Operation, ServiceError, ServiceErrorCode};

use crate::error::{expression_error, storage_error};
use crate::expression::ast::PathElement;
use crate::expression::{
    EvalContext, Expr, Placeholders, UpdateExpr, check_placeholders, parse_condition,
    parse_projection, parse_update,
};
use crate::faults::FaultPlan;
use crate::state::StoreState;
use crate::storage::{PrimaryKey, Selection, TableDefinition, TableStorage};

/// Most requests one `BatchWriteItem` call may carry.
pub const MAX_BATCH_WRITE_REQUESTS: usize = 25;
/// Most keys one `BatchGetItem` call may carry.
pub const MAX_BATCH_GET_KEYS: usize = 100;
/// Most entries one `TransactWriteItems` call may carry.
pub const MAX_TRANSACT_ITEMS: usize = 100;

const CONDITION_FAILED: &str = "The conditional request failed";

/// An in-process store that answers wire requests the way the service does.
///
/// Tables must be created before use. Every request is counted per operation,
/// and a [`FaultPlan`] can script errors, throttling, unprocessed batch
/// entries and transaction conflicts.
#[derive(Debug)]
pub struct MemoryTransport {
    state: StoreState,
    faults: FaultPlan,
    requests: DashMap<Operation, usize>,
    tokens: DashMap<String, u32>,
    page_size: usize,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    /// An empty store with unbounded pages.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: StoreState::new(),
            faults: FaultPlan::default(),
            requests: DashMap::new(),
            tokens: DashMap::new(),
            page_size: usize::MAX,
        }
    }

    /// Cap every query and scan page at `page_size` evaluated items.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a table.
    pub fn create_table(&self, definition: TableDefinition) -> Result<Arc<TableStorage>, ServiceError> {
        debug!(table = %definition.name, indexes = definition.indexes.len(), "creating table");
        self.state.create_table(definition)
    }

    /// Create the table a record type lives in.
    pub fn create_table_for<T: Record>(&self) -> Result<Arc<TableStorage>, ServiceError> {
        let definition = TableDefinition::from_schema(&T::schema()).map_err(storage_error)?;
        self.create_table(definition)
    }

    /// Registered tables.
    #[must_use]
    pub fn state(&self) -> &StoreState {
        &self.state
    }

    /// Scripted faults.
    #[must_use]
    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Requests received for `operation`, including failed ones.
    #[must_use]
    pub fn request_count(&self, operation: Operation) -> usize {
        self.requests.get(&operation).map_or(0, |r| *r.value())
    }

    /// Requests received across all operations.
    #[must_use]
    pub fn total_requests(&self) -> usize {
        self.requests.iter().map(|r| *r.value()).sum()
    }

    /// Every item of `table`, in key order.
    pub fn items(&self, table: &str) -> Result<Vec<Item>, ServiceError> {
        let table = self.state.require_table(table)?;
        let rows = table.read();
        Ok(rows.values().cloned().collect())
    }

    fn admit(&self, operation: Operation) -> Result<(), ServiceError> {
        *self.requests.entry(operation).or_insert(0) += 1;
        match self.faults.take_failure(operation) {
            Some(err) => {
                warn!(%operation, code = %err.code, "returning injected fault");
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn reject_poisoned(&self, item: &Item) -> Result<(), ServiceError> {
        if self.faults.is_poisoned(item) {
            return Err(ServiceError::validation(
                "One or more parameter values were invalid: item rejected by the store",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Expression helpers
// ---------------------------------------------------------------------------

fn condition(expr: Option<&str>) -> Result<Option<Expr>, ServiceError> {
    expr.map(parse_condition)
        .transpose()
        .map_err(expression_error)
}

/// Check that the request's placeholder maps match what its expressions use.
fn placeholders<'e>(
    conditions: impl IntoIterator<Item = &'e Expr>,
    update: Option<&UpdateExpr>,
    projection: Option<&[crate::expression::AttributePath]>,
    names: &ExpressionAttributeNames,
    values: &ExpressionAttributeValues,
) -> Result<(), ServiceError> {
    let mut used = Placeholders::default();
    conditions.into_iter().for_each(|c| used.visit_expr(c));
    if let Some(update) = update {
        used.visit_update(update);
    }
    projection
        .unwrap_or_default()
        .iter()
        .for_each(|p| used.visit_path(p));
    check_placeholders(&used, names, values).map_err(expression_error)
}

fn holds(
    condition: Option<&Expr>,
    existing: Option<&Item>,
    names: &ExpressionAttributeNames,
    values: &ExpressionAttributeValues,
) -> Result<bool, ServiceError> {
    let Some(condition) = condition else {
        return Ok(true);
    };
    let empty = Item::new();
    EvalContext::new(existing.unwrap_or(&empty), names, values)
        .evaluate(condition)
        .map_err(expression_error)
}

/// Reject updates that write to a key attribute.
fn check_update_targets(
    table: &TableStorage,
    update: &UpdateExpr,
    names: &ExpressionAttributeNames,
) -> Result<BTreeSet<String>, ServiceError> {
    let key_names = table.key_names();
    let mut touched = BTreeSet::new();
    for path in update.target_paths() {
        let Some(PathElement::Attribute(first)) = path.elements.first() else {
            continue;
        };
        let name = match first.strip_prefix('#') {
            Some(_) => names.get(first).cloned().unwrap_or_else(|| first.clone()),
            None => first.clone(),
        };
        if key_names.contains(&name) {
            return Err(ServiceError::validation(format!(
                "One or more parameter values were invalid: Cannot update attribute {name}. This attribute is part of the key"
            )));
        }
        touched.insert(name);
    }
    Ok(touched)
}

fn only(item: &Item, attributes: &BTreeSet<String>) -> Option<Item> {
    let picked: Item = item
        .iter()
        .filter(|(k, _)| attributes.contains(*k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!picked.is_empty()).then_some(picked)
}

fn limit(limit: Option<i32>) -> Result<Option<usize>, ServiceError> {
    match limit {
        None => Ok(None),
        Some(l) if l > 0 => Ok(usize::try_from(l).ok()),
        Some(l) => Err(ServiceError::validation(format!(
            "1 validation error detected: Value '{l}' at 'limit' failed to satisfy constraint: Member must have value greater than or equal to 1"
        ))),
    }
}

fn count(n: usize) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

enum Action {
    Check,
    Put(Item),
    Delete,
    Update(UpdateExpr),
}

struct Prepared<'a> {
    table: &'a str,
    position: PrimaryKey,
    key: Key,
    condition: Option<Expr>,
    names: &'a ExpressionAttributeNames,
    values: &'a ExpressionAttributeValues,
    return_on_failure: bool,
    action: Action,
}

impl MemoryTransport {
    fn prepare<'a>(
        &self,
        tables: &mut BTreeMap<&'a str, Arc<TableStorage>>,
        entry: &'a tablekit_model::types::TransactWriteItem,
    ) -> Result<Prepared<'a>, ServiceError> {
        let (table_name, names, values, cond, on_failure) = if let Some(put) = &entry.put {
            (&put.table_name, &put.expression_attribute_names, &put.expression_attribute_values, put.condition_expression.as_deref(), put.return_values_on_condition_check_failure)
        } else if let Some(update) = &entry.update {
            (&update.table_name, &update.expression_attribute_names, &update.expression_attribute_values, update.condition_expression.as_deref(), update.return_values_on_condition_check_failure)
        } else if let Some(delete) = &entry.delete {
            (&delete.table_name, &delete.expression_attribute_names, &delete.expression_attribute_values, delete.condition_expression.as_deref(), delete.return_values_on_condition_check_failure)
        } else if let Some(check) = &entry.condition_check {
            (&check.table_name, &check.expression_attribute_names, &check.expression_attribute_values, Some(check.condition_expression.as_str()), check.return_values_on_condition_check_failure)
        } else {
            return Err(ServiceError::validation(
                "TransactItems can only contain one of Check, Put, Update or Delete",
            ));
        };

        let table = match tables.get(table_name.as_str()) {
            Some(table) => Arc::clone(table),
            None => {
                let table = self.state.require_table(table_name)?;
                tables.insert(table_name.as_str(), Arc::clone(&table));
                table
            }
        };
        let condition = condition(cond)?;

        let (position, key, action) = if let Some(put) = &entry.put {
            self.reject_poisoned(&put.item)?;
            let position = table.item_position(&put.item).map_err(storage_error)?;
            (position, table.key_of(&put.item), Action::Put(put.item.clone()))
        } else if let Some(update) = &entry.update {
            let position = table.key_position(&update.key).map_err(storage_error)?;
            let parsed = parse_update(&update.update_expression).map_err(expression_error)?;
            check_update_targets(&table, &parsed, names)?;
            (position, update.key.clone(), Action::Update(parsed))
        } else if let Some(delete) = &entry.delete {
            let position = table.key_position(&delete.key).map_err(storage_error)?;
            (position, delete.key.clone(), Action::Delete)
        } else {
            let key = entry
                .condition_check
                .as_ref()
                .map(|c| c.key.clone())
                .unwrap_or_default();
            let position = table.key_position(&key).map_err(storage_error)?;
            (position, key, Action::Check)
        };

        let update = match &action {
            Action::Update(u) => Some(u),
            _ => None,
        };
        placeholders(condition.as_ref(), update, None, names, values)?;

        Ok(Prepared {
            table: table_name.as_str(),
            position,
            key,
            condition,
            names,
            values,
            return_on_failure: on_failure == Some(ReturnValuesOnConditionCheckFailure::AllOld),
            action,
        })
    }
}

fn fingerprint(input: &TransactWriteItemsInput) -> u32 {
    crc32fast::hash(format!("{:?}", input.transact_items).as_bytes())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

#[async_trait]
impl Transport for MemoryTransport {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError> {
        self.admit(Operation::GetItem)?;
        let table = self.state.require_table(&input.table_name)?;
        let position = table.key_position(&input.key).map_err(storage_error)?;
        let projection = input
            .projection_expression
            .as_deref()
            .map(parse_projection)
            .transpose()
            .map_err(expression_error)?;
        let values = ExpressionAttributeValues::new();
        placeholders(
            None,
            None,
            projection.as_deref(),
            &input.expression_attribute_names,
            &values,
        )?;

        let rows = table.read();
        let item = match (rows.get(&position), &projection) {
            (None, _) => None,
            (Some(item), None) => Some(item.clone()),
            (Some(item), Some(paths)) => Some(
                EvalContext::new(item, &input.expression_attribute_names, &values)
                    .apply_projection(paths)
                    .map_err(expression_error)?,
            ),
        };
        debug!(table = %input.table_name, found = item.is_some(), "get item");
        Ok(GetItemOutput {
            item,
            consumed_capacity: None,
        })
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError> {
        self.admit(Operation::PutItem)?;
        let table = self.state.require_table(&input.table_name)?;
        let position = table.item_position(&input.item).map_err(storage_error)?;
        self.reject_poisoned(&input.item)?;
        let condition = condition(input.condition_expression.as_deref())?;
        placeholders(
            condition.as_ref(),
            None,
            None,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let return_old = match input.return_values.unwrap_or_default() {
            ReturnValue::None => false,
            ReturnValue::AllOld => true,
            other => {
                return Err(ServiceError::validation(format!(
                    "Return values set to invalid value: {other}"
                )));
            }
        };

        let mut rows = table.write();
        if !holds(
            condition.as_ref(),
            rows.get(&position),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(ServiceError::conditional_check_failed(CONDITION_FAILED));
        }
        let old = rows.insert(position, input.item);
        debug!(table = %input.table_name, replaced = old.is_some(), "put item");
        Ok(PutItemOutput {
            attributes: old.filter(|_| return_old),
            consumed_capacity: None,
        })
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError> {
        self.admit(Operation::UpdateItem)?;
        let table = self.state.require_table(&input.table_name)?;
        let position = table.key_position(&input.key).map_err(storage_error)?;
        let update = input
            .update_expression
            .as_deref()
            .map(parse_update)
            .transpose()
            .map_err(expression_error)?
            .unwrap_or_default();
        let condition = condition(input.condition_expression.as_deref())?;
        placeholders(
            condition.as_ref(),
            Some(&update),
            None,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let touched = check_update_targets(&table, &update, &input.expression_attribute_names)?;

        let mut rows = table.write();
        let existing = rows.get(&position).cloned();
        if !holds(
            condition.as_ref(),
            existing.as_ref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(ServiceError::conditional_check_failed(CONDITION_FAILED));
        }
        let base = existing.clone().unwrap_or_else(|| input.key.clone());
        let updated = EvalContext::new(
            &base,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )
        .apply_update(&update)
        .map_err(expression_error)?;
        table.item_position(&updated).map_err(storage_error)?;
        self.reject_poisoned(&updated)?;
        rows.insert(position, updated.clone());
        debug!(table = %input.table_name, created = existing.is_none(), "update item");

        let attributes = match input.return_values.unwrap_or_default() {
            ReturnValue::None => None,
            ReturnValue::AllOld => existing,
            ReturnValue::AllNew => Some(updated),
            ReturnValue::UpdatedOld => existing.as_ref().and_then(|e| only(e, &touched)),
            ReturnValue::UpdatedNew => only(&updated, &touched),
        };
        Ok(UpdateItemOutput {
            attributes,
            consumed_capacity: None,
        })
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError> {
        self.admit(Operation::DeleteItem)?;
        let table = self.state.require_table(&input.table_name)?;
        let position = table.key_position(&input.key).map_err(storage_error)?;
        self.reject_poisoned(&input.key)?;
        let condition = condition(input.condition_expression.as_deref())?;
        placeholders(
            condition.as_ref(),
            None,
            None,
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;
        let return_old = match input.return_values.unwrap_or_default() {
            ReturnValue::None => false,
            ReturnValue::AllOld => true,
            other => {
                return Err(ServiceError::validation(format!(
                    "Return values set to invalid value: {other}"
                )));
            }
        };

        let mut rows = table.write();
        if !holds(
            condition.as_ref(),
            rows.get(&position),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )? {
            return Err(ServiceError::conditional_check_failed(CONDITION_FAILED));
        }
        let old = rows.remove(&position);
        debug!(table = %input.table_name, existed = old.is_some(), "delete item");
        Ok(DeleteItemOutput {
            attributes: old.filter(|_| return_old),
            consumed_capacity: None,
        })
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError> {
        self.admit(Operation::Query)?;
        let table = self.state.require_table(&input.table_name)?;
        let key_condition = condition(input.key_condition_expression.as_deref())?.ok_or_else(|| {
            ServiceError::validation(
                "Either the KeyConditions or KeyConditionExpression parameter must be specified in the request.",
            )
        })?;
        let filter = condition(input.filter_expression.as_deref())?;
        let projection = input
            .projection_expression
            .as_deref()
            .map(parse_projection)
            .transpose()
            .map_err(expression_error)?;
        placeholders(
            std::iter::once(&key_condition).chain(filter.as_ref()),
            None,
            projection.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let rows = table.read();
        let selected = table
            .select(
                &rows,
                &Selection {
                    index: input.index_name.as_deref(),
                    key_condition: Some(&key_condition),
                    filter: filter.as_ref(),
                    projection: projection.as_deref(),
                    names: &input.expression_attribute_names,
                    values: &input.expression_attribute_values,
                    forward: input.scan_index_forward.unwrap_or(true),
                    limit: limit(input.limit)?,
                    exclusive_start_key: &input.exclusive_start_key,
                    segment: None,
                    count_only: input.select == Some(Select::Count),
                },
                self.page_size,
            )
            .map_err(storage_error)?;
        Ok(QueryOutput {
            items: selected.items,
            count: count(selected.count),
            scanned_count: count(selected.scanned_count),
            last_evaluated_key: selected.last_evaluated_key,
            consumed_capacity: None,
        })
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, ServiceError> {
        self.admit(Operation::Scan)?;
        let table = self.state.require_table(&input.table_name)?;
        let segment = match (input.segment, input.total_segments) {
            (None, None) => None,
            (Some(segment), Some(total)) if total >= 1 && (0..total).contains(&segment) => {
                Some((segment.unsigned_abs(), total.unsigned_abs()))
            }
            _ => {
                return Err(ServiceError::validation(
                    "The Segment parameter must be in [0, TotalSegments) and both must be given",
                ));
            }
        };
        let filter = condition(input.filter_expression.as_deref())?;
        let projection = input
            .projection_expression
            .as_deref()
            .map(parse_projection)
            .transpose()
            .map_err(expression_error)?;
        placeholders(
            filter.as_ref(),
            None,
            projection.as_deref(),
            &input.expression_attribute_names,
            &input.expression_attribute_values,
        )?;

        let rows = table.read();
        let selected = table
            .select(
                &rows,
                &Selection {
                    index: input.index_name.as_deref(),
                    key_condition: None,
                    filter: filter.as_ref(),
                    projection: projection.as_deref(),
                    names: &input.expression_attribute_names,
                    values: &input.expression_attribute_values,
                    forward: true,
                    limit: limit(input.limit)?,
                    exclusive_start_key: &input.exclusive_start_key,
                    segment,
                    count_only: input.select == Some(Select::Count),
                },
                self.page_size,
            )
            .map_err(storage_error)?;
        Ok(ScanOutput {
            items: selected.items,
            count: count(selected.count),
            scanned_count: count(selected.scanned_count),
            last_evaluated_key: selected.last_evaluated_key,
            consumed_capacity: None,
        })
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, ServiceError> {
        self.admit(Operation::BatchGetItem)?;
        let total: usize = input.request_items.values().map(|r| r.keys.len()).sum();
        if total == 0 || total > MAX_BATCH_GET_KEYS {
            return Err(ServiceError::validation(format!(
                "Too many items requested for the BatchGetItem call: {total} keys, limit {MAX_BATCH_GET_KEYS}"
            )));
        }
        let withheld = self.faults.take_unprocessed();
        let process_up_to = total.saturating_sub(withheld);

        let mut output = BatchGetItemOutput::default();
        let mut seen = 0;
        for (table_name, request) in &input.request_items {
            let table = self.state.require_table(table_name)?;
            let projection = request
                .projection_expression
                .as_deref()
                .map(parse_projection)
                .transpose()
                .map_err(expression_error)?;
            let values = ExpressionAttributeValues::new();
            placeholders(
                None,
                None,
                projection.as_deref(),
                &request.expression_attribute_names,
                &values,
            )?;

            let mut positions = BTreeSet::new();
            let rows = table.read();
            let found = output.responses.entry(table_name.clone()).or_default();
            for key in &request.keys {
                let position = table.key_position(key).map_err(storage_error)?;
                if !positions.insert(position.clone()) {
                    return Err(ServiceError::validation(
                        "Provided list of item keys contains duplicates",
                    ));
                }
                seen += 1;
                if seen > process_up_to || self.faults.is_poisoned(key) {
                    output
                        .unprocessed_keys
                        .entry(table_name.clone())
                        .or_insert_with(|| KeysAndAttributes {
                            keys: Vec::new(),
                            ..request.clone()
                        })
                        .keys
                        .push(key.clone());
                    continue;
                }
                if let Some(item) = rows.get(&position) {
                    found.push(match &projection {
                        Some(paths) => EvalContext::new(item, &request.expression_attribute_names, &values)
                            .apply_projection(paths)
                            .map_err(expression_error)?,
                        None => item.clone(),
                    });
                }
            }
        }
        debug!(
            keys = total,
            unprocessed = output.unprocessed_keys.values().map(|k| k.keys.len()).sum::<usize>(),
            "batch get"
        );
        Ok(output)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, ServiceError> {
        self.admit(Operation::BatchWriteItem)?;
        let total: usize = input.request_items.values().map(Vec::len).sum();
        if total == 0 || total > MAX_BATCH_WRITE_REQUESTS {
            return Err(ServiceError::validation(format!(
                "Too many items requested for the BatchWriteItem call: {total} requests, limit {MAX_BATCH_WRITE_REQUESTS}"
            )));
        }

        // Validate the whole request before applying any of it.
        let mut planned = Vec::with_capacity(total);
        for (table_name, requests) in &input.request_items {
            let table = self.state.require_table(table_name)?;
            let mut positions = BTreeSet::new();
            for request in requests {
                let (position, subject) = match (&request.put_request, &request.delete_request) {
                    (Some(put), None) => (table.item_position(&put.item), &put.item),
                    (None, Some(delete)) => (table.key_position(&delete.key), &delete.key),
                    _ => {
                        return Err(ServiceError::validation(
                            "A WriteRequest must contain exactly one of PutRequest or DeleteRequest",
                        ));
                    }
                };
                let position = position.map_err(storage_error)?;
                if !positions.insert(position.clone()) {
                    return Err(ServiceError::validation(
                        "Provided list of item keys contains duplicates",
                    ));
                }
                let poisoned = self.faults.is_poisoned(subject);
                planned.push((table_name, Arc::clone(&table), position, request, poisoned));
            }
        }

        let withheld = self.faults.take_unprocessed();
        let process_up_to = total.saturating_sub(withheld);
        let mut output = BatchWriteItemOutput::default();
        for (i, (table_name, table, position, request, poisoned)) in planned.into_iter().enumerate() {
            if poisoned || i >= process_up_to {
                output
                    .unprocessed_items
                    .entry(table_name.clone())
                    .or_default()
                    .push(request.clone());
                continue;
            }
            let mut rows = table.write();
            apply_write(&mut rows, position, request);
        }
        debug!(
            requests = total,
            unprocessed = output.unprocessed_items.values().map(Vec::len).sum::<usize>(),
            "batch write"
        );
        Ok(output)
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, ServiceError> {
        self.admit(Operation::TransactWriteItems)?;
        let total = input.transact_items.len();
        if total == 0 || total > MAX_TRANSACT_ITEMS {
            return Err(ServiceError::validation(format!(
                "Member must have length less than or equal to {MAX_TRANSACT_ITEMS} and greater than or equal to 1: {total} items"
            )));
        }

        let print = fingerprint(&input);
        if let Some(token) = &input.client_request_token {
            if let Some(seen) = self.tokens.get(token) {
                if *seen.value() == print {
                    debug!(token = %token, "replayed idempotent transaction");
                    return Ok(TransactWriteItemsOutput::default());
                }
                return Err(ServiceError::with_message(
                    ServiceErrorCode::IdempotentParameterMismatchException,
                    "The request uses the same client token as a previous, but non-identical request.",
                ));
            }
        }

        if self.faults.take_conflict() {
            warn!(items = total, "cancelling transaction with injected conflict");
            let reasons = (0..total)
                .map(|_| {
                    CancellationReason::new(
                        "TransactionConflict",
                        "Transaction is ongoing for the item",
                    )
                })
                .collect();
            return Err(ServiceError::transaction_canceled(reasons));
        }

        let mut tables = BTreeMap::new();
        let mut prepared = Vec::with_capacity(total);
        let mut targets = BTreeSet::new();
        for entry in &input.transact_items {
            let op = self.prepare(&mut tables, entry)?;
            if !targets.insert((op.table, op.position.clone())) {
                return Err(ServiceError::validation(
                    "Transaction request cannot include multiple operations on one item",
                ));
            }
            prepared.push(op);
        }

        // Lock in name order so concurrent transactions cannot deadlock.
        let mut guards: BTreeMap<&str, _> = tables
            .iter()
            .map(|(name, table)| (*name, table.write()))
            .collect();

        let mut reasons = Vec::with_capacity(total);
        let mut writes = Vec::with_capacity(total);
        for op in &prepared {
            let rows = guards
                .get(op.table)
                .ok_or_else(|| ServiceError::internal_error("transaction table not locked"))?;
            let existing = rows.get(&op.position);
            if holds(op.condition.as_ref(), existing, op.names, op.values)? {
                reasons.push(CancellationReason::none());
            } else {
                let mut reason = CancellationReason::new("ConditionalCheckFailed", CONDITION_FAILED);
                if op.return_on_failure {
                    reason.item = existing.cloned();
                }
                reasons.push(reason);
                continue;
            }
            let write = match &op.action {
                Action::Check => None,
                Action::Put(item) => Some(Some(item.clone())),
                Action::Delete => Some(None),
                Action::Update(update) => {
                    let base = existing.cloned().unwrap_or_else(|| op.key.clone());
                    let updated = EvalContext::new(&base, op.names, op.values)
                        .apply_update(update)
                        .map_err(expression_error)?;
                    tables
                        .get(op.table)
                        .map(|t| t.item_position(&updated))
                        .transpose()
                        .map_err(storage_error)?;
                    Some(Some(updated))
                }
            };
            if let Some(write) = write {
                writes.push((op.table, op.position.clone(), write));
            }
        }

        if reasons.iter().any(CancellationReason::is_failure) {
            let failed: Vec<usize> = reasons
                .iter()
                .enumerate()
                .filter(|(_, r)| r.is_failure())
                .map(|(i, _)| i)
                .collect();
            debug!(?failed, "transaction cancelled");
            return Err(ServiceError::transaction_canceled(reasons));
        }

        for (table, position, write) in writes {
            if let Some(rows) = guards.get_mut(table) {
                match write {
                    Some(item) => {
                        rows.insert(position, item);
                    }
                    None => {
                        rows.remove(&position);
                    }
                }
            }
        }
        if let Some(token) = &input.client_request_token {
            self.tokens.insert(token.clone(), print);
        }
        debug!(items = total, "transaction committed");
        Ok(TransactWriteItemsOutput::default())
    }
}

fn apply_write(rows: &mut crate::storage::Rows, position: PrimaryKey, request: &WriteRequest) {
    if let Some(put) = &request.put_request {
        rows.insert(position, put.item.clone());
    } else {
        rows.remove(&position);
    }
}
