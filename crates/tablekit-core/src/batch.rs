//! Batch reads and writes: chunking, retry of unprocessed entries, fan-out.
//!
//! Writes go out in chunks of [`MAX_BATCH_WRITE_ITEMS`]. After every response
//! only the unprocessed entries are resent, on the retry policy's schedule.
//! Writes still unprocessed when the policy runs out are flushed one at a
//! time with `PutItem`/`DeleteItem`, so a single poison item cannot fail its
//! whole chunk. Reads still unprocessed are an error unless the caller asks
//! for them to be reported.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::{StreamExt, stream};
use tablekit_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, PutItemInput,
};
use tablekit_model::types::{KeysAndAttributes, WriteRequest};
use tablekit_model::{Item, Key};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancellationToken;
use crate::client::{Client, guarded};
use crate::config::{ClientConfig, MAX_BATCH_WRITE_ITEMS};
use crate::error::{BatchError, Error, Result, translate};
use crate::expr::Compiler;
use crate::item::{RecordKey, Stamp, encode_key, prepare_item};
use crate::retry::RetryPolicy;
use crate::schema::{Record, Schema};

/// Progress callback: `(processed, total)` after each chunk.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Failed-chunk callback: `(chunk_index, error)`.
pub type ChunkErrorFn = Arc<dyn Fn(usize, &Error) -> ChunkDecision + Send + Sync>;

/// What to do after a chunk fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDecision {
    /// Record the failure and carry on with the next chunk.
    Continue,
    /// Stop and return the chunk's error.
    Abort,
}

/// One write of a batch.
#[derive(Debug, Clone)]
pub enum WriteOp<'a, T> {
    /// Put the record, replacing any stored item.
    Put(&'a T),
    /// Delete the item with this key.
    Delete(RecordKey),
}

/// Options of a batch write.
#[derive(Clone)]
pub struct BatchWriteOptions {
    /// Concurrent chunks when `parallel` is set.
    pub max_concurrency: usize,
    /// Fan chunks out instead of running them in order.
    pub parallel: bool,
    /// Retry policy for unprocessed items; `None` flushes them immediately.
    pub retry: Option<RetryPolicy>,
    /// Called after each chunk.
    pub progress: Option<ProgressFn>,
    /// Called for each failed chunk. Without it the first failure aborts.
    pub on_error: Option<ChunkErrorFn>,
}

impl BatchWriteOptions {
    /// Options taken from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_concurrency: config.write_concurrency,
            parallel: config.parallel_batches,
            retry: config.batch_retry.clone(),
            progress: None,
            on_error: None,
        }
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Set the failed-chunk callback.
    #[must_use]
    pub fn with_error_handler(
        mut self,
        handler: impl Fn(usize, &Error) -> ChunkDecision + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for BatchWriteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWriteOptions")
            .field("max_concurrency", &self.max_concurrency)
            .field("parallel", &self.parallel)
            .field("retry", &self.retry)
            .field("progress", &self.progress.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Options of a batch read.
#[derive(Clone)]
pub struct BatchGetOptions {
    /// Keys per `BatchGetItem` call, capped at 100.
    pub chunk_size: usize,
    /// Concurrent chunks when `parallel` is set.
    pub max_concurrency: usize,
    /// Fan chunks out instead of running them in order.
    pub parallel: bool,
    /// Retry policy for unprocessed keys.
    pub retry: Option<RetryPolicy>,
    /// Strongly consistent reads.
    pub consistent_read: bool,
    /// Fields to read; key fields are always added.
    pub projection: Vec<String>,
    /// Return keys still unprocessed after retries instead of failing.
    pub report_unprocessed: bool,
    /// Called after each chunk.
    pub progress: Option<ProgressFn>,
}

impl BatchGetOptions {
    /// Options taken from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            chunk_size: config.read_chunk(),
            max_concurrency: config.read_concurrency,
            parallel: config.parallel_batches,
            retry: config.batch_retry.clone(),
            consistent_read: config.consistent_read,
            projection: Vec::new(),
            report_unprocessed: false,
            progress: None,
        }
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }
}

impl fmt::Debug for BatchGetOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchGetOptions")
            .field("chunk_size", &self.chunk_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("parallel", &self.parallel)
            .field("retry", &self.retry)
            .field("consistent_read", &self.consistent_read)
            .field("projection", &self.projection)
            .field("report_unprocessed", &self.report_unprocessed)
            .finish_non_exhaustive()
    }
}

/// Result of [`BatchExecutor::batch_get_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetReport<T> {
    /// Records found, in the order their keys were given.
    pub items: Vec<T>,
    /// Keys the store answered with no item.
    pub missing_keys: Vec<Key>,
    /// Keys still unprocessed after retries.
    pub unprocessed_keys: Vec<Key>,
}

struct WriteChunk {
    index: usize,
    requests: Vec<(usize, WriteRequest)>,
}

struct ReadShape {
    projection: Option<String>,
    names: BTreeMap<String, String>,
    consistent_read: bool,
}

/// Batch operations of one client.
#[derive(Debug, Clone)]
pub struct BatchExecutor<'c> {
    client: &'c Client,
    token: CancellationToken,
}

impl<'c> BatchExecutor<'c> {
    pub(crate) fn new(client: &'c Client) -> Self {
        Self {
            client,
            token: CancellationToken::new(),
        }
    }

    /// Abort between chunks and during retry sleeps when `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.token = token.clone();
        self
    }

    /// Put every record.
    pub async fn batch_create<T: Record>(&self, records: &[T]) -> Result<()> {
        let ops: Vec<WriteOp<'_, T>> = records.iter().map(WriteOp::Put).collect();
        self.batch_write_with(&ops, &self.write_options()).await
    }

    /// Delete every key.
    pub async fn batch_delete<T: Record>(&self, keys: &[RecordKey]) -> Result<()> {
        let ops: Vec<WriteOp<'_, T>> = keys.iter().cloned().map(WriteOp::Delete).collect();
        self.batch_write_with(&ops, &self.write_options()).await
    }

    /// Puts followed by deletes, in one batch.
    pub async fn batch_write<T: Record>(&self, puts: &[T], deletes: &[RecordKey]) -> Result<()> {
        let ops: Vec<WriteOp<'_, T>> = puts
            .iter()
            .map(WriteOp::Put)
            .chain(deletes.iter().cloned().map(WriteOp::Delete))
            .collect();
        self.batch_write_with(&ops, &self.write_options()).await
    }

    /// Run writes with explicit options. On failure after retries and the
    /// one-by-one flush, returns [`Error::Batch`] naming each failed input
    /// index.
    #[instrument(skip_all, fields(operation = "batch_write", items = ops.len()))]
    pub async fn batch_write_with<T: Record>(
        &self,
        ops: &[WriteOp<'_, T>],
        options: &BatchWriteOptions,
    ) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let schema = self.client.schema::<T>()?;
        let codec = self.client.codec();
        let requests = ops
            .iter()
            .map(|op| match op {
                WriteOp::Put(record) => {
                    prepare_item(&schema, codec, *record, Stamp::Upsert).map(WriteRequest::put)
                }
                WriteOp::Delete(key) => encode_key(&schema, codec, key).map(WriteRequest::delete),
            })
            .collect::<Result<Vec<_>>>()?;

        let total = requests.len();
        let indexed: Vec<(usize, WriteRequest)> = requests.into_iter().enumerate().collect();
        let chunks: Vec<WriteChunk> = indexed
            .chunks(MAX_BATCH_WRITE_ITEMS)
            .enumerate()
            .map(|(index, chunk)| WriteChunk {
                index,
                requests: chunk.to_vec(),
            })
            .collect();
        let concurrency = if options.parallel {
            options.max_concurrency.max(1)
        } else {
            1
        };
        info!(
            table = schema.table(),
            items = total,
            chunks = chunks.len(),
            concurrency,
            "starting batch write"
        );

        let table = schema.table();
        let retry = options.retry.as_ref();
        let mut results = stream::iter(chunks)
            .map(|chunk| async move {
                let inputs: Vec<usize> = chunk.requests.iter().map(|(i, _)| *i).collect();
                let outcome = self.write_chunk(table, chunk.requests, retry).await;
                (chunk.index, inputs, outcome)
            })
            .buffer_unordered(concurrency);

        let mut failed = Vec::new();
        let mut processed = 0;
        while let Some((chunk_index, inputs, outcome)) = results.next().await {
            match outcome {
                Ok(item_failures) => failed.extend(item_failures),
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => match options.on_error.as_ref().map(|h| h(chunk_index, &e)) {
                    Some(ChunkDecision::Continue) => {
                        warn!(chunk = chunk_index, error = %e, "batch write chunk failed, continuing");
                        failed.extend(inputs.iter().map(|&index| (index, e.replicate())));
                    }
                    _ => return Err(e),
                },
            }
            processed += inputs.len();
            if let Some(progress) = &options.progress {
                progress(processed, total);
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            failed.sort_by_key(|(index, _)| *index);
            Err(Error::Batch(BatchError { failed }))
        }
    }

    /// Records for `keys`, in key order. Keys with no stored item are left
    /// out.
    pub async fn batch_get<T: Record>(&self, keys: &[RecordKey]) -> Result<Vec<T>> {
        let options = BatchGetOptions::from_config(self.client.config());
        Ok(self.batch_get_with(keys, &options).await?.items)
    }

    /// Read with explicit options.
    #[instrument(skip_all, fields(operation = "batch_get", keys = keys.len()))]
    pub async fn batch_get_with<T: Record>(
        &self,
        keys: &[RecordKey],
        options: &BatchGetOptions,
    ) -> Result<BatchGetReport<T>> {
        let empty = BatchGetReport {
            items: Vec::new(),
            missing_keys: Vec::new(),
            unprocessed_keys: Vec::new(),
        };
        if keys.is_empty() {
            return Ok(empty);
        }
        let schema = self.client.schema::<T>()?;
        let codec = self.client.codec();

        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(keys.len());
        for key in keys {
            let encoded = encode_key(&schema, codec, key)?;
            if seen.insert(key_id(&encoded)?) {
                unique.push(encoded);
            }
        }
        let shape = self.read_shape(&schema, options)?;

        let table = schema.table();
        let retry = options.retry.as_ref();
        let shape = &shape;
        let total = unique.len();
        let concurrency = if options.parallel {
            options.max_concurrency.max(1)
        } else {
            1
        };
        let chunk_size = options.chunk_size.clamp(1, crate::config::MAX_BATCH_GET_KEYS);
        let mut results = stream::iter(unique.chunks(chunk_size))
            .map(|chunk| async move {
                let len = chunk.len();
                (len, self.get_chunk(table, chunk.to_vec(), shape, retry).await)
            })
            .buffer_unordered(concurrency);

        let mut found: HashMap<String, Item> = HashMap::new();
        let mut unprocessed = Vec::new();
        let mut processed = 0;
        while let Some((len, outcome)) = results.next().await {
            let (items, leftover) = outcome?;
            for item in items {
                found.insert(key_id(&schema.key_of(&item)?)?, item);
            }
            unprocessed.extend(leftover);
            processed += len;
            if let Some(progress) = &options.progress {
                progress(processed, total);
            }
        }
        drop(results);

        if !unprocessed.is_empty() && !options.report_unprocessed {
            warn!(unprocessed = unprocessed.len(), "batch get exhausted retries");
            return Err(Error::BatchIncomplete { unprocessed });
        }
        let pending: HashSet<String> = unprocessed.iter().map(key_id).collect::<Result<_>>()?;

        let mut report = empty;
        for key in unique {
            let id = key_id(&key)?;
            match found.remove(&id) {
                Some(item) => report.items.push(codec.decode_record(item, &schema)?),
                None if pending.contains(&id) => {}
                None => report.missing_keys.push(key),
            }
        }
        report.unprocessed_keys = unprocessed;
        debug!(
            items = report.items.len(),
            missing = report.missing_keys.len(),
            unprocessed = report.unprocessed_keys.len(),
            "batch get complete"
        );
        Ok(report)
    }

    fn write_options(&self) -> BatchWriteOptions {
        BatchWriteOptions::from_config(self.client.config())
    }

    fn read_shape(&self, schema: &Schema, options: &BatchGetOptions) -> Result<ReadShape> {
        let mut shape = ReadShape {
            projection: None,
            names: BTreeMap::new(),
            consistent_read: options.consistent_read,
        };
        if options.projection.is_empty() {
            return Ok(shape);
        }
        let mut fields = options.projection.clone();
        let pk = schema.partition_key()?;
        for key in std::iter::once(pk).chain(schema.sort_key()) {
            let field = schema.field_name(&key.attribute);
            if !fields.iter().any(|f| schema.attribute_name(f) == key.attribute) {
                fields.push(field);
            }
        }
        let mut compiler = Compiler::new(schema, self.client.codec());
        compiler.projection(&fields)?;
        let request = compiler.finish()?;
        shape.projection = request.projection;
        shape.names = request.names;
        Ok(shape)
    }

    /// Send one chunk until nothing is unprocessed or the policy runs out,
    /// then flush the rest one at a time. Returns per-item failures.
    async fn write_chunk(
        &self,
        table: &str,
        requests: Vec<(usize, WriteRequest)>,
        retry: Option<&RetryPolicy>,
    ) -> Result<Vec<(usize, Error)>> {
        let mut pending = requests;
        let mut attempt = 0;
        loop {
            let input = BatchWriteItemInput {
                request_items: BTreeMap::from([(
                    table.to_owned(),
                    pending.iter().map(|(_, r)| r.clone()).collect(),
                )]),
            };
            match guarded(&self.token, self.client.transport().batch_write_item(input)).await? {
                Ok(mut output) => {
                    let unprocessed = output.unprocessed_items.remove(table).unwrap_or_default();
                    if unprocessed.is_empty() {
                        return Ok(Vec::new());
                    }
                    let first = pending.first().map_or(0, |(i, _)| *i);
                    pending = unprocessed
                        .into_iter()
                        .map(|request| {
                            let index = pending
                                .iter()
                                .find(|(_, sent)| *sent == request)
                                .map_or(first, |(i, _)| *i);
                            (index, request)
                        })
                        .collect();
                }
                Err(e) => {
                    let err = translate(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    debug!(error = %err, "batch write request failed, retrying chunk");
                }
            }

            let Some(policy) = retry.filter(|p| attempt < p.max_retries) else {
                break;
            };
            let delay = policy.delay(attempt);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                unprocessed = pending.len(),
                "retrying unprocessed batch writes"
            );
            self.token.sleep(delay).await?;
            attempt += 1;
        }

        warn!(
            table,
            remaining = pending.len(),
            "batch write retries exhausted, writing items one by one"
        );
        let mut failed = Vec::new();
        for (index, request) in pending {
            match self.write_one(table, request).await {
                Ok(()) => {}
                Err(Error::Canceled) => return Err(Error::Canceled),
                Err(e) => failed.push((index, e)),
            }
        }
        Ok(failed)
    }

    async fn write_one(&self, table: &str, request: WriteRequest) -> Result<()> {
        let transport = self.client.transport();
        if let Some(put) = request.put_request {
            let input = PutItemInput {
                table_name: table.to_owned(),
                item: put.item,
                ..PutItemInput::default()
            };
            self.client
                .send(&self.token, || transport.put_item(input.clone()))
                .await?;
        } else if let Some(delete) = request.delete_request {
            let input = DeleteItemInput {
                table_name: table.to_owned(),
                key: delete.key,
                ..DeleteItemInput::default()
            };
            self.client
                .send(&self.token, || transport.delete_item(input.clone()))
                .await?;
        }
        Ok(())
    }

    /// Read one chunk, retrying unprocessed keys. Returns the items read and
    /// the keys still unprocessed.
    async fn get_chunk(
        &self,
        table: &str,
        keys: Vec<Key>,
        shape: &ReadShape,
        retry: Option<&RetryPolicy>,
    ) -> Result<(Vec<Item>, Vec<Key>)> {
        let mut pending = keys;
        let mut items = Vec::new();
        let mut attempt = 0;
        loop {
            let input = BatchGetItemInput {
                request_items: BTreeMap::from([(
                    table.to_owned(),
                    KeysAndAttributes {
                        keys: pending.clone(),
                        projection_expression: shape.projection.clone(),
                        expression_attribute_names: shape.names.clone(),
                        consistent_read: shape.consistent_read.then_some(true),
                    },
                )]),
            };
            match guarded(&self.token, self.client.transport().batch_get_item(input)).await? {
                Ok(mut output) => {
                    items.extend(output.responses.remove(table).unwrap_or_default());
                    pending = output
                        .unprocessed_keys
                        .remove(table)
                        .map(|k| k.keys)
                        .unwrap_or_default();
                    if pending.is_empty() {
                        return Ok((items, pending));
                    }
                }
                Err(e) => {
                    let err = translate(e);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                }
            }

            let Some(policy) = retry.filter(|p| attempt < p.max_retries) else {
                return Ok((items, pending));
            };
            let delay = policy.delay(attempt);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                unprocessed = pending.len(),
                "retrying unprocessed batch keys"
            );
            self.token.sleep(delay).await?;
            attempt += 1;
        }
    }
}

/// A hashable identity for a key.
fn key_id(key: &Key) -> Result<String> {
    serde_json::to_string(key).map_err(|e| Error::codec(format!("failed to encode key: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tablekit_model::output::{BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput};
    use tablekit_model::{AttributeValue, ServiceError};

    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{Call, Order, Reply, client_with, order_item};

    fn orders(n: usize) -> Vec<Order> {
        (0..n)
            .map(|i| Order::new("c1", &format!("o{i:03}"), "NEW"))
            .collect()
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .jitter(0.0)
            .build()
    }

    fn order_key(order_id: &str) -> Key {
        Key::from([
            ("customer_id".to_owned(), AttributeValue::S("c1".to_owned())),
            ("order_id".to_owned(), AttributeValue::S(order_id.to_owned())),
        ])
    }

    #[tokio::test]
    async fn test_should_split_writes_into_chunks_of_25() {
        let (client, transport) = client_with(vec![]);
        client.batch().batch_create(&orders(26)).await.unwrap();
        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let sizes: Vec<usize> = calls
            .iter()
            .map(|c| match c {
                Call::BatchWrite(input) => input.request_items["orders"].len(),
                other => panic!("unexpected call {other:?}"),
            })
            .collect();
        assert_eq!(sizes, vec![25, 1]);
    }

    #[tokio::test]
    async fn test_should_not_call_for_empty_batch() {
        let (client, transport) = client_with(vec![]);
        client.batch().batch_create::<Order>(&[]).await.unwrap();
        assert!(client.batch().batch_get::<Order>(&[]).await.unwrap().is_empty());
        assert!(transport.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_retry_only_unprocessed_items() {
        let (client, transport) = client_with(vec![
            Reply::BatchWrite(BatchWriteItemOutput {
                unprocessed_items: BTreeMap::from([(
                    "orders".to_owned(),
                    vec![WriteRequest::delete(order_key("o1"))],
                )]),
            }),
            Reply::BatchWrite(BatchWriteItemOutput::default()),
        ]);
        let options = BatchWriteOptions {
            retry: Some(fast_retry()),
            ..BatchWriteOptions::from_config(client.config())
        };
        let ops: Vec<WriteOp<'_, Order>> = ["o0", "o1", "o2"]
            .into_iter()
            .map(|id| WriteOp::Delete(RecordKey::from(("c1", id))))
            .collect();
        client.batch().batch_write_with(&ops, &options).await.unwrap();

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let Call::BatchWrite(retry) = &calls[1] else {
            panic!("expected batch write");
        };
        assert_eq!(
            retry.request_items["orders"],
            vec![WriteRequest::delete(order_key("o1"))]
        );
    }

    #[tokio::test]
    async fn test_should_flush_and_report_poison_item() {
        let (client, transport) = client_with(vec![
            Reply::BatchWrite(BatchWriteItemOutput {
                unprocessed_items: BTreeMap::from([(
                    "orders".to_owned(),
                    vec![
                        WriteRequest::delete(order_key("o0")),
                        WriteRequest::delete(order_key("o1")),
                    ],
                )]),
            }),
            Reply::Delete(DeleteItemOutput::default()),
            Reply::Error(ServiceError::validation("item is poisoned")),
        ]);
        let options = BatchWriteOptions {
            retry: None,
            ..BatchWriteOptions::from_config(client.config())
        };
        let keys = [RecordKey::from(("c1", "o0")), RecordKey::from(("c1", "o1"))];
        let ops: Vec<WriteOp<'_, Order>> = keys.iter().cloned().map(WriteOp::Delete).collect();
        let err = client
            .batch()
            .batch_write_with(&ops, &options)
            .await
            .unwrap_err();
        let Error::Batch(batch) = err else {
            panic!("expected batch error, got {err:?}");
        };
        assert_eq!(batch.failed.len(), 1);
        assert_eq!(batch.failed[0].0, 1);
        assert_eq!(batch.failed[0].1.kind(), ErrorKind::Validation);
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_should_continue_past_failed_chunk_when_asked() {
        let (client, transport) = client_with(vec![
            Reply::Error(ServiceError::validation("bad chunk")),
            Reply::BatchWrite(BatchWriteItemOutput::default()),
        ]);
        let progress = Arc::new(AtomicUsize::new(0));
        let seen = progress.clone();
        let options = BatchWriteOptions::from_config(client.config())
            .with_error_handler(|_, _| ChunkDecision::Continue)
            .with_progress(move |processed, _| seen.store(processed, Ordering::SeqCst));
        let records = orders(30);
        let ops: Vec<WriteOp<'_, Order>> = records.iter().map(WriteOp::Put).collect();
        let err = client
            .batch()
            .batch_write_with(&ops, &options)
            .await
            .unwrap_err();
        let Error::Batch(batch) = err else {
            panic!("expected batch error");
        };
        let indices: Vec<usize> = batch.failed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, (0..25).collect::<Vec<_>>());
        assert!(batch.failed.iter().all(|(_, e)| e.kind() == ErrorKind::Validation));
        assert_eq!(transport.calls().len(), 2);
        assert_eq!(progress.load(Ordering::SeqCst), 30);
    }

    #[tokio::test]
    async fn test_should_report_every_input_of_a_continued_chunk() {
        let (client, _transport) = client_with(vec![
            Reply::BatchWrite(BatchWriteItemOutput::default()),
            Reply::Error(ServiceError::validation("bad chunk")),
        ]);
        let options = BatchWriteOptions::from_config(client.config())
            .with_error_handler(|_, _| ChunkDecision::Continue);
        let records = orders(30);
        let ops: Vec<WriteOp<'_, Order>> = records.iter().map(WriteOp::Put).collect();
        let err = client
            .batch()
            .batch_write_with(&ops, &options)
            .await
            .unwrap_err();
        let Error::Batch(batch) = err else {
            panic!("expected batch error");
        };
        let indices: Vec<usize> = batch.failed.iter().map(|(i, _)| *i).collect();
        assert_eq!(indices, vec![25, 26, 27, 28, 29]);
    }

    #[tokio::test]
    async fn test_should_abort_on_failed_chunk_by_default() {
        let (client, transport) = client_with(vec![Reply::Error(ServiceError::validation(
            "bad chunk",
        ))]);
        let err = client.batch().batch_create(&orders(30)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_should_align_reads_to_key_order() {
        let (client, transport) = client_with(vec![Reply::BatchGet(BatchGetItemOutput {
            responses: BTreeMap::from([(
                "orders".to_owned(),
                vec![order_item("c1", "o2", "B", 2), order_item("c1", "o1", "A", 1)],
            )]),
            ..BatchGetItemOutput::default()
        })]);
        let keys = [
            RecordKey::from(("c1", "o1")),
            RecordKey::from(("c1", "o9")),
            RecordKey::from(("c1", "o2")),
            RecordKey::from(("c1", "o1")),
        ];
        let options = BatchGetOptions {
            projection: vec!["status".to_owned()],
            ..BatchGetOptions::from_config(client.config())
        };
        let report = client
            .batch()
            .batch_get_with::<Order>(&keys, &options)
            .await
            .unwrap();
        assert_eq!(
            report.items.iter().map(|o| o.order_id.as_str()).collect::<Vec<_>>(),
            vec!["o1", "o2"]
        );
        assert_eq!(report.missing_keys, vec![order_key("o9")]);

        let Call::BatchGet(input) = &transport.calls()[0] else {
            panic!("expected batch get");
        };
        let request = &input.request_items["orders"];
        assert_eq!(request.keys.len(), 3);
        assert_eq!(request.expression_attribute_names.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_should_fail_when_keys_stay_unprocessed() {
        let stuck = || {
            Reply::BatchGet(BatchGetItemOutput {
                unprocessed_keys: BTreeMap::from([(
                    "orders".to_owned(),
                    KeysAndAttributes {
                        keys: vec![order_key("o1")],
                        ..KeysAndAttributes::default()
                    },
                )]),
                ..BatchGetItemOutput::default()
            })
        };
        let (client, transport) = client_with(vec![stuck(), stuck(), stuck()]);
        let options = BatchGetOptions {
            retry: Some(fast_retry()),
            ..BatchGetOptions::from_config(client.config())
        };
        let err = client
            .batch()
            .batch_get_with::<Order>(&[RecordKey::from(("c1", "o1"))], &options)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BatchIncomplete);
        assert_eq!(
            err.to_string(),
            "batch get exhausted retries with 1 unprocessed keys"
        );
        assert_eq!(transport.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_should_stop_when_canceled() {
        let (client, transport) = client_with(vec![]);
        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .batch()
            .with_cancellation(&token)
            .batch_create(&orders(3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(transport.calls().is_empty());
    }
}
