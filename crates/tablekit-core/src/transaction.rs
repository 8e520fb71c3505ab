//! Atomic multi-item writes with idempotent retries.
//!
//! Each operation is compiled as soon as it is added; the first failure is
//! kept and reported by [`TransactionBuilder::execute`]. A cancellation is
//! retried only when every failed reason is transient, reusing the same
//! client request token so the service can deduplicate.

use std::collections::BTreeMap;

use tablekit_model::input::TransactWriteItemsInput;
use tablekit_model::types::TransactWriteItem;
use tablekit_model::{AttributeValue, Key};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::client::{Client, guarded};
use crate::config::MAX_TRANSACTION_ITEMS;
use crate::error::{Error, Result, translate_with_operations};
use crate::expr::{Compiler, FieldCompare, IntoOperator, Joiner, Predicate, VersionCheck};
use crate::item::{
    Stamp, field_updates, prepare_item, record_json, record_key, record_version,
};
use crate::retry::RetryPolicy;
use crate::schema::{Record, Schema};
use crate::update::UpdateSpec;
use crate::value::Value;

/// A condition attached to one transaction operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactCondition {
    /// `field op value`.
    Compare(FieldCompare),
    /// A hand-written expression with its own `:name` values.
    Raw {
        /// The expression.
        expression: String,
        /// Values keyed by placeholder.
        values: BTreeMap<String, Value>,
    },
    /// The item must exist.
    PrimaryKeyExists,
    /// The item must not exist.
    PrimaryKeyNotExists,
    /// The stored version must equal this value.
    VersionEquals(i64),
}

impl TransactCondition {
    /// A field comparison. An unknown operator spelling is reported when the
    /// operation is added.
    pub fn field(field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Result<Self> {
        Ok(Self::Compare(FieldCompare::new(
            field,
            op.into_operator()?,
            value,
        )))
    }

    /// A raw condition expression.
    pub fn raw<K, V>(expression: &str, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Raw {
            expression: expression.to_owned(),
            values: values
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Compile `conditions`; returns `true` when one of them constrains the
/// version attribute.
fn apply_conditions(
    compiler: &mut Compiler<'_>,
    schema: &Schema,
    conditions: &[TransactCondition],
) -> Result<bool> {
    let mut versioned = false;
    for condition in conditions {
        match condition {
            TransactCondition::Compare(compare) => {
                let items = [(Predicate::Compare(compare.clone()), Joiner::And)];
                versioned |= schema
                    .version_attribute()
                    .is_some_and(|a| compiler.references_attribute(&items, a));
                compiler.condition(&items)?;
            }
            TransactCondition::Raw { expression, values } => {
                compiler.raw_condition(expression, values)?;
            }
            TransactCondition::PrimaryKeyExists => compiler.key_exists(true)?,
            TransactCondition::PrimaryKeyNotExists => compiler.key_exists(false)?,
            TransactCondition::VersionEquals(version) => {
                if schema.version_attribute().is_none() {
                    return Err(Error::validation(format!(
                        "table `{}` has no version field",
                        schema.table()
                    )));
                }
                compiler.version_condition(VersionCheck::Equals(*version))?;
                versioned = true;
            }
        }
    }
    Ok(versioned)
}

/// Builder of one transaction.
#[derive(Debug)]
pub struct TransactionBuilder<'c> {
    client: &'c Client,
    items: Vec<TransactWriteItem>,
    error: Option<Error>,
    retry: Option<RetryPolicy>,
}

impl<'c> TransactionBuilder<'c> {
    pub(crate) fn new(client: &'c Client) -> Self {
        Self {
            client,
            items: Vec::new(),
            error: None,
            retry: client.config().transaction_retry.clone(),
        }
    }

    /// Number of operations added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if no operation was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Override the retry policy; `None` disables retries.
    #[must_use]
    pub fn retry_policy(mut self, retry: Option<RetryPolicy>) -> Self {
        self.retry = retry;
        self
    }

    /// Put a record. Versioned records are guarded by their current version
    /// and stored with the next one.
    #[must_use]
    pub fn put<T: Record>(self, record: &T, conditions: &[TransactCondition]) -> Self {
        self.push(|client| build_put(client, record, conditions, false))
    }

    /// Put a record that must not exist yet.
    #[must_use]
    pub fn create<T: Record>(self, record: &T, conditions: &[TransactCondition]) -> Self {
        self.push(|client| build_put(client, record, conditions, true))
    }

    /// Copy `fields` from `record` onto the stored item.
    #[must_use]
    pub fn update<T: Record>(
        self,
        record: &T,
        fields: &[&str],
        conditions: &[TransactCondition],
    ) -> Self {
        self.push(|client| {
            let schema = client.schema::<T>()?;
            let json = record_json(record)?;
            let spec = UpdateSpec::from_ops(field_updates(&schema, &json, fields)?);
            build_update(client, &schema, &json, spec, conditions)
        })
    }

    /// Update the item of `record` with operations from `build`.
    #[must_use]
    pub fn update_with_builder<T: Record>(
        self,
        record: &T,
        build: impl FnOnce(UpdateSpec) -> UpdateSpec,
        conditions: &[TransactCondition],
    ) -> Self {
        self.push(|client| {
            let schema = client.schema::<T>()?;
            let json = record_json(record)?;
            build_update(client, &schema, &json, build(UpdateSpec::new()), conditions)
        })
    }

    /// Delete the item of `record`, guarded by its version when it has one.
    #[must_use]
    pub fn delete<T: Record>(self, record: &T, conditions: &[TransactCondition]) -> Self {
        self.push(|client| {
            let schema = client.schema::<T>()?;
            let json = record_json(record)?;
            let key = record_key(&schema, client.codec(), &json)?;
            let mut compiler = Compiler::new(&schema, client.codec());
            let versioned = apply_conditions(&mut compiler, &schema, conditions)?;
            if let Some(version) = record_version(&schema, &json)
                && !versioned
            {
                compiler.version_condition(VersionCheck::Equals(version))?;
            }
            Ok(compiler.finish()?.into_transact_delete(key))
        })
    }

    /// Check conditions on the item of `record` without modifying it.
    #[must_use]
    pub fn condition_check<T: Record>(self, record: &T, conditions: &[TransactCondition]) -> Self {
        self.push(|client| {
            if conditions.is_empty() {
                return Err(Error::validation(
                    "condition check requires at least one condition",
                ));
            }
            let schema = client.schema::<T>()?;
            let json = record_json(record)?;
            let key = record_key(&schema, client.codec(), &json)?;
            let mut compiler = Compiler::new(&schema, client.codec());
            apply_conditions(&mut compiler, &schema, conditions)?;
            compiler.finish()?.into_transact_condition_check(key)
        })
    }

    /// Run the transaction.
    pub async fn execute(self) -> Result<()> {
        self.execute_with(&CancellationToken::new()).await
    }

    /// Run the transaction, aborting retries and sleeps when `token` fires.
    #[instrument(skip_all, fields(operation = "transact_write", items = self.items.len()))]
    pub async fn execute_with(self, token: &CancellationToken) -> Result<()> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.items.is_empty() {
            return Err(Error::validation("transaction has no operations"));
        }
        let operations: Vec<&'static str> = self.items.iter().map(TransactWriteItem::action).collect();
        let input = TransactWriteItemsInput {
            transact_items: self.items,
            client_request_token: Some(Uuid::new_v4().to_string()),
        };
        info!(operations = operations.len(), "starting transaction");

        let mut attempt = 0;
        loop {
            let transport = self.client.transport();
            let err = match guarded(token, transport.transact_write_items(input.clone())).await? {
                Ok(_) => {
                    debug!(attempt, "transaction committed");
                    return Ok(());
                }
                Err(e) => translate_with_operations(e, &operations),
            };
            if let Error::TransactionCanceled { .. } = &err {
                warn!(attempt, failed = ?err.failed(), "transaction canceled");
            }
            let transient = err.is_transient_cancellation() || err.is_retryable();
            let Some(policy) = self
                .retry
                .as_ref()
                .filter(|p| transient && attempt < p.max_retries)
            else {
                return Err(err);
            };
            let delay = policy.delay(attempt);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "retrying transaction"
            );
            token.sleep(delay).await?;
            attempt += 1;
        }
    }

    fn push(mut self, build: impl FnOnce(&Client) -> Result<TransactWriteItem>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if self.items.len() >= MAX_TRANSACTION_ITEMS {
            self.error = Some(Error::validation(format!(
                "a transaction holds at most {MAX_TRANSACTION_ITEMS} operations"
            )));
            return self;
        }
        match build(self.client) {
            Ok(item) => self.items.push(item),
            Err(e) => self.error = Some(e),
        }
        self
    }
}

fn build_put<T: Record>(
    client: &Client,
    record: &T,
    conditions: &[TransactCondition],
    guard: bool,
) -> Result<TransactWriteItem> {
    let schema = client.schema::<T>()?;
    let codec = client.codec();
    let json = record_json(record)?;
    let stamp = if guard { Stamp::Create } else { Stamp::Upsert };
    let mut item = prepare_item(&schema, codec, record, stamp)?;

    let mut compiler = Compiler::new(&schema, codec);
    if guard {
        compiler.key_exists(false)?;
    }
    let versioned = apply_conditions(&mut compiler, &schema, conditions)?;
    if let Some(attribute) = schema.version_attribute() {
        let current = record_version(&schema, &json).unwrap_or(0);
        if !versioned {
            compiler.version_condition(if current > 0 {
                VersionCheck::Equals(current)
            } else {
                VersionCheck::Absent
            })?;
        }
        item.insert(attribute.to_owned(), AttributeValue::number(current + 1));
    }
    Ok(compiler.finish()?.into_transact_put(item))
}

fn build_update(
    client: &Client,
    schema: &Schema,
    json: &serde_json::Map<String, serde_json::Value>,
    spec: UpdateSpec,
    conditions: &[TransactCondition],
) -> Result<TransactWriteItem> {
    let key: Key = record_key(schema, client.codec(), json)?;
    let mut compiler = Compiler::new(schema, client.codec());
    let known = record_version(schema, json).filter(|v| *v > 0);
    let versioned = apply_conditions(&mut compiler, schema, conditions)?;
    spec.apply(
        &mut compiler,
        schema,
        known,
        Some(VersionCheck::Absent),
        versioned,
    )?;
    compiler.finish()?.into_transact_update(key)
}
