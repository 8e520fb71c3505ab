//! The output of the compiler: expression strings plus placeholder maps,
//! ready to be turned into a wire input.

use std::collections::BTreeSet;

use tablekit_model::input::{
    DeleteItemInput, GetItemInput, PutItemInput, QueryInput, ScanInput, UpdateItemInput,
};
use tablekit_model::types::{
    ConditionCheck, Delete, ExpressionAttributeNames, ExpressionAttributeValues, Put, ReturnValue,
    Select, TransactWriteItem, Update,
};
use tablekit_model::{Item, Key};

use crate::error::{Error, Result};

/// A fully compiled request. Immutable once the compiler hands it out.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRequest {
    /// Target table.
    pub table_name: String,
    /// Target index for queries and scans.
    pub index_name: Option<String>,
    /// `KeyConditionExpression`.
    pub key_condition: Option<String>,
    /// `FilterExpression`.
    pub filter: Option<String>,
    /// `UpdateExpression`.
    pub update: Option<String>,
    /// `ConditionExpression`.
    pub condition: Option<String>,
    /// `ProjectionExpression`.
    pub projection: Option<String>,
    /// `ExpressionAttributeNames`.
    pub names: ExpressionAttributeNames,
    /// `ExpressionAttributeValues`.
    pub values: ExpressionAttributeValues,
    /// Page size.
    pub limit: Option<i32>,
    /// Where a page starts.
    pub exclusive_start_key: Option<Key>,
    /// Ascending (`true`) or descending sort-key order.
    pub scan_index_forward: bool,
    /// Strongly consistent reads.
    pub consistent_read: bool,
    /// Ask for counts only.
    pub select_count: bool,
    /// `(segment, total_segments)` of a parallel scan.
    pub segment: Option<(i32, i32)>,
    /// What a write returns.
    pub return_values: Option<ReturnValue>,
}

impl CompiledRequest {
    /// An empty request against `table_name`.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            index_name: None,
            key_condition: None,
            filter: None,
            update: None,
            condition: None,
            projection: None,
            names: ExpressionAttributeNames::new(),
            values: ExpressionAttributeValues::new(),
            limit: None,
            exclusive_start_key: None,
            scan_index_forward: true,
            consistent_read: false,
            select_count: false,
            segment: None,
            return_values: None,
        }
    }

    /// The expression fragments that are present.
    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        [
            &self.key_condition,
            &self.filter,
            &self.update,
            &self.condition,
            &self.projection,
        ]
        .into_iter()
        .filter_map(Option::as_deref)
    }

    /// Check that every placeholder referenced by a fragment has exactly one
    /// map entry and every map entry is referenced.
    pub fn verify(&self) -> Result<()> {
        let mut names = BTreeSet::new();
        let mut values = BTreeSet::new();
        for fragment in self.fragments() {
            collect_tokens(fragment, &mut names, &mut values);
        }

        for name in &names {
            if !self.names.contains_key(*name) {
                return Err(Error::validation(format!(
                    "name placeholder `{name}` has no definition"
                )));
            }
        }
        for value in &values {
            if !self.values.contains_key(*value) {
                return Err(Error::validation(format!(
                    "value placeholder `{value}` has no definition"
                )));
            }
        }
        if let Some(unused) = self.names.keys().find(|k| !names.contains(k.as_str())) {
            return Err(Error::validation(format!(
                "name placeholder `{unused}` is never referenced"
            )));
        }
        if let Some(unused) = self.values.keys().find(|k| !values.contains(k.as_str())) {
            return Err(Error::validation(format!(
                "value placeholder `{unused}` is never referenced"
            )));
        }
        Ok(())
    }

    fn select(&self) -> Option<Select> {
        self.select_count.then_some(Select::Count)
    }

    /// `GetItem` for `key`.
    #[must_use]
    pub fn into_get_input(self, key: Key) -> GetItemInput {
        GetItemInput {
            table_name: self.table_name,
            key,
            consistent_read: self.consistent_read.then_some(true),
            projection_expression: self.projection,
            expression_attribute_names: self.names,
        }
    }

    /// `Query`.
    #[must_use]
    pub fn into_query_input(self) -> QueryInput {
        QueryInput {
            select: self.select(),
            table_name: self.table_name,
            index_name: self.index_name,
            key_condition_expression: self.key_condition,
            filter_expression: self.filter,
            projection_expression: self.projection,
            expression_attribute_names: self.names,
            expression_attribute_values: self.values,
            scan_index_forward: (!self.scan_index_forward).then_some(false),
            limit: self.limit,
            exclusive_start_key: self.exclusive_start_key.unwrap_or_default(),
            consistent_read: self.consistent_read.then_some(true),
        }
    }

    /// `Scan`.
    #[must_use]
    pub fn into_scan_input(self) -> ScanInput {
        ScanInput {
            select: self.select(),
            table_name: self.table_name,
            index_name: self.index_name,
            filter_expression: self.filter,
            projection_expression: self.projection,
            expression_attribute_names: self.names,
            expression_attribute_values: self.values,
            limit: self.limit,
            exclusive_start_key: self.exclusive_start_key.unwrap_or_default(),
            segment: self.segment.map(|(s, _)| s),
            total_segments: self.segment.map(|(_, t)| t),
            consistent_read: self.consistent_read.then_some(true),
        }
    }

    /// `PutItem` of `item`.
    #[must_use]
    pub fn into_put_input(self, item: Item) -> PutItemInput {
        PutItemInput {
            table_name: self.table_name,
            item,
            condition_expression: self.condition,
            expression_attribute_names: self.names,
            expression_attribute_values: self.values,
            return_values: self.return_values,
        }
    }

    /// `UpdateItem` of the item at `key`.
    #[must_use]
    pub fn into_update_input(self, key: Key) -> UpdateItemInput {
        UpdateItemInput {
            table_name: self.table_name,
            key,
            update_expression: self.update,
            condition_expression: self.condition,
            expression_attribute_names: self.names,
            expression_attribute_values: self.values,
            return_values: self.return_values,
        }
    }

    /// `DeleteItem` of the item at `key`.
    #[must_use]
    pub fn into_delete_input(self, key: Key) -> DeleteItemInput {
        DeleteItemInput {
            table_name: self.table_name,
            key,
            condition_expression: self.condition,
            expression_attribute_names: self.names,
            expression_attribute_values: self.values,
            return_values: self.return_values,
        }
    }

    /// A transactional put.
    #[must_use]
    pub fn into_transact_put(self, item: Item) -> TransactWriteItem {
        TransactWriteItem {
            put: Some(Put {
                table_name: self.table_name,
                item,
                condition_expression: self.condition,
                expression_attribute_names: self.names,
                expression_attribute_values: self.values,
                return_values_on_condition_check_failure: None,
            }),
            ..TransactWriteItem::default()
        }
    }

    /// A transactional update; fails without an update expression.
    pub fn into_transact_update(self, key: Key) -> Result<TransactWriteItem> {
        let update_expression = self
            .update
            .ok_or_else(|| Error::validation("transactional update has no update expression"))?;
        Ok(TransactWriteItem {
            update: Some(Update {
                table_name: self.table_name,
                key,
                update_expression,
                condition_expression: self.condition,
                expression_attribute_names: self.names,
                expression_attribute_values: self.values,
                return_values_on_condition_check_failure: None,
            }),
            ..TransactWriteItem::default()
        })
    }

    /// A transactional delete.
    #[must_use]
    pub fn into_transact_delete(self, key: Key) -> TransactWriteItem {
        TransactWriteItem {
            delete: Some(Delete {
                table_name: self.table_name,
                key,
                condition_expression: self.condition,
                expression_attribute_names: self.names,
                expression_attribute_values: self.values,
                return_values_on_condition_check_failure: None,
            }),
            ..TransactWriteItem::default()
        }
    }

    /// A transactional condition check; fails without a condition.
    pub fn into_transact_condition_check(self, key: Key) -> Result<TransactWriteItem> {
        let condition_expression = self
            .condition
            .ok_or_else(|| Error::validation("condition check requires at least one condition"))?;
        Ok(TransactWriteItem {
            condition_check: Some(ConditionCheck {
                table_name: self.table_name,
                key,
                condition_expression,
                expression_attribute_names: self.names,
                expression_attribute_values: self.values,
                return_values_on_condition_check_failure: None,
            }),
            ..TransactWriteItem::default()
        })
    }
}

/// Collect `#name` and `:value` tokens from an expression.
pub(crate) fn collect_tokens<'a>(
    expression: &'a str,
    names: &mut BTreeSet<&'a str>,
    values: &mut BTreeSet<&'a str>,
) {
    let bytes = expression.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let sigil = bytes[i];
        if sigil == b'#' || sigil == b':' {
            let start = i;
            i += 1;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i > start + 1 {
                let token = &expression[start..i];
                if sigil == b'#' {
                    names.insert(token);
                } else {
                    values.insert(token);
                }
            }
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tablekit_model::AttributeValue;

    use super::*;

    fn request() -> CompiledRequest {
        let mut req = CompiledRequest::new("orders");
        req.key_condition = Some("#n1 = :v1".to_owned());
        req.filter = Some("#n2 IN (:v2, :v3)".to_owned());
        req.names = BTreeMap::from([
            ("#n1".to_owned(), "pk".to_owned()),
            ("#n2".to_owned(), "status".to_owned()),
        ]);
        req.values = BTreeMap::from([
            (":v1".to_owned(), AttributeValue::S("a".to_owned())),
            (":v2".to_owned(), AttributeValue::S("PAID".to_owned())),
            (":v3".to_owned(), AttributeValue::S("SHIPPED".to_owned())),
        ]);
        req
    }

    #[test]
    fn test_should_verify_consistent_request() {
        request().verify().unwrap();
    }

    #[test]
    fn test_should_reject_dangling_placeholder() {
        let mut req = request();
        req.filter = Some("#n2 = :v9".to_owned());
        let err = req.verify().unwrap_err();
        assert!(err.to_string().contains(":v9"));
    }

    #[test]
    fn test_should_reject_unreferenced_entry() {
        let mut req = request();
        req.names.insert("#n3".to_owned(), "extra".to_owned());
        assert!(req.verify().is_err());
    }

    #[test]
    fn test_should_build_descending_query_input() {
        let mut req = request();
        req.scan_index_forward = false;
        req.select_count = true;
        let input = req.into_query_input();
        assert_eq!(input.scan_index_forward, Some(false));
        assert_eq!(input.select, Some(Select::Count));
        assert!(input.exclusive_start_key.is_empty());
    }
}
