//! The fluent query builder and its read terminals.
//!
//! A [`Query`] collects `where` clauses, filters, options and write
//! conditions. Each terminal compiles the collected model once and picks the
//! cheapest request shape: `GetItem` for an exact key lookup, `Query` when a
//! partition-key equality is present on the table or a declared index, `Scan`
//! otherwise.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, TryStreamExt, stream};
use tablekit_model::{Item, Key};
use tracing::{debug, instrument};

use crate::cancel::CancellationToken;
use crate::client::Client;
use crate::cursor::{Cursor, SortOrder};
use crate::error::{Error, Result};
use crate::expr::{
    CompiledRequest, Compiler, FieldCompare, GroupBuilder, IntoOperator, Joiner, Predicate,
};
use crate::index::select_index;
use crate::item::key_from_conditions;
use crate::retry::RetryPolicy;
use crate::schema::{Record, Schema};
use crate::value::Value;

/// Most segments a parallel scan may use.
pub const MAX_SCAN_SEGMENTS: usize = 1_000_000;

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Decoded records, in store order.
    pub items: Vec<T>,
    /// Cursor for the next page, if there is one.
    pub next_cursor: Option<String>,
    /// Returns `true` when another page exists.
    pub has_more: bool,
    /// Items returned after filtering.
    pub count: usize,
    /// Items evaluated before filtering.
    pub scanned_count: usize,
}

/// Builder for reads and writes against one record type.
pub struct Query<'c, T> {
    pub(crate) client: &'c Client,
    schema: Option<Arc<Schema>>,
    error: Option<Error>,
    pub(crate) conditions: Vec<FieldCompare>,
    filters: Vec<(Predicate, Joiner)>,
    index: Option<String>,
    order: Option<SortOrder>,
    limit: Option<usize>,
    offset: Option<usize>,
    projection: Vec<String>,
    consistent: Option<bool>,
    cursor: Option<String>,
    read_retry: Option<RetryPolicy>,
    pub(crate) if_not_exists: bool,
    pub(crate) write_conditions: Vec<(Predicate, Joiner)>,
    pub(crate) raw_conditions: Vec<(String, BTreeMap<String, Value>)>,
    pub(crate) token: CancellationToken,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> fmt::Debug for Query<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("table", &self.table())
            .field("conditions", &self.conditions)
            .field("filters", &self.filters)
            .field("index", &self.index)
            .field("limit", &self.limit)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

/// A fetched page, still in wire form.
struct Fetched {
    items: Vec<Item>,
    last_key: Option<Key>,
    count: i32,
    scanned_count: i32,
}

impl<'c, T: Record> Query<'c, T> {
    pub(crate) fn new(client: &'c Client, schema: Result<Arc<Schema>>) -> Self {
        let (schema, error) = match schema {
            Ok(schema) => (Some(schema), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            client,
            schema,
            error,
            conditions: Vec::new(),
            filters: Vec::new(),
            index: None,
            order: None,
            limit: None,
            offset: None,
            projection: Vec::new(),
            consistent: None,
            cursor: None,
            read_retry: None,
            if_not_exists: false,
            write_conditions: Vec::new(),
            raw_conditions: Vec::new(),
            token: CancellationToken::new(),
            _record: PhantomData,
        }
    }

    // -- builder --

    /// Constrain a field. Key fields become the key condition; anything
    /// else is filtered.
    #[must_use]
    pub fn where_(mut self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        if let Some(compare) = self.compare(field, op, value, false) {
            self.conditions.push(compare);
        }
        self
    }

    /// `AND field op value` filter.
    #[must_use]
    pub fn filter(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_filter(field, op, value, false, Joiner::And)
    }

    /// `OR field op value` filter.
    #[must_use]
    pub fn or_filter(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_filter(field, op, value, false, Joiner::Or)
    }

    /// `AND size(field) op value` filter.
    #[must_use]
    pub fn filter_size(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_filter(field, op, value, true, Joiner::And)
    }

    /// `AND (group)` filter.
    #[must_use]
    pub fn filter_group(self, build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        self.push_group(build, Joiner::And)
    }

    /// `OR (group)` filter.
    #[must_use]
    pub fn or_filter_group(self, build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        self.push_group(build, Joiner::Or)
    }

    /// Read from a secondary index.
    #[must_use]
    pub fn index(mut self, name: &str) -> Self {
        self.index = Some(name.to_owned());
        self
    }

    /// Sort-key order of a `Query`.
    #[must_use]
    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Page size, and the most records [`all`](Self::all) returns.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `n` matching records of [`all`](Self::all) and
    /// [`first`](Self::first). With a limit, `limit` records are still
    /// returned after the skipped ones.
    #[must_use]
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    /// Project only these fields.
    #[must_use]
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.projection = fields.iter().map(|f| (*f).to_owned()).collect();
        self
    }

    /// Strongly consistent reads.
    #[must_use]
    pub fn consistent_read(mut self, consistent: bool) -> Self {
        self.consistent = Some(consistent);
        self
    }

    /// Resume after a cursor from [`Page::next_cursor`].
    #[must_use]
    pub fn cursor(mut self, cursor: &str) -> Self {
        self.cursor = Some(cursor.to_owned());
        self
    }

    /// Make [`create`](Self::create) fail if the key already exists.
    #[must_use]
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self
    }

    /// Attach a condition to the write this query performs.
    #[must_use]
    pub fn with_condition(
        mut self,
        field: &str,
        op: impl IntoOperator,
        value: impl Into<Value>,
    ) -> Self {
        if let Some(compare) = self.compare(field, op, value, false) {
            self.write_conditions
                .push((Predicate::Compare(compare), Joiner::And));
        }
        self
    }

    /// Attach a hand-written condition with its own `:name` values.
    #[must_use]
    pub fn with_raw_condition<K, V>(
        mut self,
        expression: &str,
        values: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.raw_conditions.push((expression.to_owned(), values));
        self
    }

    /// Re-read when nothing matched, for records written moments before to
    /// an eventually consistent index. [`first`](Self::first) retries on
    /// [`Error::ItemNotFound`], [`all`](Self::all) and the aggregates while
    /// the result is empty. The delay starts at `initial_delay` and doubles
    /// up to five seconds.
    #[must_use]
    pub fn with_read_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.read_retry = Some(
            RetryPolicy::builder()
                .max_retries(max_retries)
                .initial_delay(initial_delay)
                .max_delay(Duration::from_secs(5))
                .jitter(0.0)
                .build(),
        );
        self
    }

    /// Abort retries, sleeps and page fetches when `token` fires.
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.token = token.clone();
        self
    }

    // -- read terminals --

    /// The first matching record, or [`Error::ItemNotFound`].
    #[instrument(skip_all, fields(table = %self.table(), operation = "first"))]
    pub async fn first(mut self) -> Result<T> {
        let schema = self.prepare()?;
        let mut attempt = 0;
        loop {
            let outcome = self.first_once(&schema).await;
            if matches!(outcome, Err(Error::ItemNotFound))
                && self.retry_read(&mut attempt).await?
            {
                continue;
            }
            return outcome;
        }
    }

    /// Every matching record, paging automatically. With a limit, stops as
    /// soon as that many records are collected.
    #[instrument(skip_all, fields(table = %self.table(), operation = "all"))]
    pub async fn all(mut self) -> Result<Vec<T>> {
        let schema = self.prepare()?;
        let items = self.read_all(&schema).await?;
        items.into_iter().map(|i| self.decode(&schema, i)).collect()
    }

    /// Exactly one request; the cursor for the next page is returned, not
    /// followed.
    #[instrument(skip_all, fields(table = %self.table(), operation = "page"))]
    pub async fn all_paginated(mut self) -> Result<Page<T>> {
        let schema = self.prepare()?;
        let (mut request, is_query) = self.compile_read(&schema, false)?;
        let index = request.index_name.clone();
        request.exclusive_start_key = self.start_key(index.as_deref())?;
        let page = self.fetch(request, is_query).await?;

        let next_cursor = match page.last_key {
            Some(last_key) => Some(
                Cursor {
                    last_key,
                    index,
                    sort: self.order,
                }
                .encode()?,
            ),
            None => None,
        };
        let items = page
            .items
            .into_iter()
            .map(|i| self.decode(&schema, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(Page {
            items,
            has_more: next_cursor.is_some(),
            next_cursor,
            count: usize::try_from(page.count).unwrap_or_default(),
            scanned_count: usize::try_from(page.scanned_count).unwrap_or_default(),
        })
    }

    /// Number of matching records, summed across pages.
    #[instrument(skip_all, fields(table = %self.table(), operation = "count"))]
    pub async fn count(mut self) -> Result<usize> {
        let schema = self.prepare()?;
        let (request, is_query) = self.compile_read(&schema, true)?;
        let mut start = self.start_key(request.index_name.as_deref())?;
        let mut total = 0usize;
        loop {
            let mut page_request = request.clone();
            page_request.exclusive_start_key = start.take();
            let page = self.fetch(page_request, is_query).await?;
            total += usize::try_from(page.count).unwrap_or_default();
            if self.limit.is_some_and(|limit| total >= limit) {
                break;
            }
            match page.last_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        Ok(self.limit.map_or(total, |limit| total.min(limit)))
    }

    /// Parallel scan over `segments` segments. Segments run on a bounded
    /// pool; results are concatenated in segment order.
    #[instrument(skip_all, fields(table = %self.table(), operation = "parallel_scan", segments = segments))]
    pub async fn scan_all_segments(mut self, segments: usize) -> Result<Vec<T>> {
        if segments == 0 || segments > MAX_SCAN_SEGMENTS {
            return Err(Error::validation(format!(
                "segment count must be between 1 and {MAX_SCAN_SEGMENTS}, got {segments}"
            )));
        }
        let total = i32::try_from(segments)
            .map_err(|_| Error::validation("segment count is out of range"))?;
        let schema = self.prepare()?;
        let request = self.compile_scan(&schema)?;
        let concurrency = self.client.config().read_concurrency.max(1);

        let this = &self;
        let request = &request;
        let mut results: Vec<(i32, Vec<Item>)> = stream::iter(0..total)
            .map(|segment| async move {
                this.scan_segment(request, segment, total)
                    .await
                    .map(|items| (segment, items))
            })
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;
        results.sort_by_key(|(segment, _)| *segment);

        results
            .into_iter()
            .flat_map(|(_, items)| items)
            .map(|item| self.decode(&schema, item))
            .collect()
    }

    // -- internals --

    pub(crate) fn table(&self) -> &str {
        self.schema.as_deref().map_or("", Schema::table)
    }

    /// Surface the first builder error, or hand out the schema.
    pub(crate) fn prepare(&mut self) -> Result<Arc<Schema>> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.schema
            .clone()
            .ok_or_else(|| Error::validation("query has no schema"))
    }

    pub(crate) fn decode(&self, schema: &Schema, item: Item) -> Result<T> {
        self.client.codec().decode_record(item, schema)
    }

    /// Compile the caller's write conditions into `compiler`.
    pub(crate) fn apply_conditions(&self, compiler: &mut Compiler<'_>) -> Result<()> {
        compiler.condition(&self.write_conditions)?;
        for (expression, values) in &self.raw_conditions {
            compiler.raw_condition(expression, values)?;
        }
        Ok(())
    }

    fn compare(
        &mut self,
        field: &str,
        op: impl IntoOperator,
        value: impl Into<Value>,
        size: bool,
    ) -> Option<FieldCompare> {
        match op.into_operator() {
            Ok(op) => Some(FieldCompare {
                field: field.to_owned(),
                op,
                value: value.into(),
                size,
            }),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    fn push_filter(
        mut self,
        field: &str,
        op: impl IntoOperator,
        value: impl Into<Value>,
        size: bool,
        joiner: Joiner,
    ) -> Self {
        if let Some(compare) = self.compare(field, op, value, size) {
            self.filters.push((Predicate::Compare(compare), joiner));
        }
        self
    }

    fn push_group(mut self, build: impl FnOnce(GroupBuilder) -> GroupBuilder, joiner: Joiner) -> Self {
        match Predicate::group(build) {
            Ok(group) => self.filters.push((group, joiner)),
            Err(e) => {
                self.error.get_or_insert(e);
            }
        }
        self
    }

    fn consistent(&self) -> bool {
        self.consistent
            .unwrap_or(self.client.config().consistent_read)
    }

    /// Raw items [`all`](Self::all) would decode, read retries included.
    pub(crate) async fn read_all(&self, schema: &Schema) -> Result<Vec<Item>> {
        let mut attempt = 0;
        loop {
            let items = self.all_once(schema).await?;
            if items.is_empty() && self.retry_read(&mut attempt).await? {
                continue;
            }
            return Ok(items);
        }
    }

    async fn first_once(&self, schema: &Schema) -> Result<T> {
        if let Some(item) = self.get(schema).await? {
            return item
                .ok_or(Error::ItemNotFound)
                .and_then(|item| self.decode(schema, item));
        }
        let offset = self.offset.unwrap_or(0);
        let item = self
            .collect(schema, Some(offset + 1))
            .await?
            .into_iter()
            .nth(offset)
            .ok_or(Error::ItemNotFound)?;
        self.decode(schema, item)
    }

    async fn all_once(&self, schema: &Schema) -> Result<Vec<Item>> {
        if let Some(item) = self.get(schema).await? {
            return Ok(item.into_iter().collect());
        }
        let offset = self.offset.unwrap_or(0);
        let mut items = self
            .collect(schema, self.limit.map(|limit| limit + offset))
            .await?;
        items.drain(..offset.min(items.len()));
        Ok(items)
    }

    /// Sleep before the next read retry. `false` once the retries are spent
    /// or none were asked for.
    async fn retry_read(&self, attempt: &mut u32) -> Result<bool> {
        let Some(policy) = &self.read_retry else {
            return Ok(false);
        };
        if *attempt >= policy.max_retries {
            return Ok(false);
        }
        let delay = policy.delay(*attempt);
        *attempt += 1;
        debug!(
            attempt = *attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "read matched nothing, retrying"
        );
        self.token.sleep(delay).await?;
        Ok(true)
    }

    /// `GetItem` when the query is an exact key lookup with no read options
    /// `GetItem` cannot express. `Some(None)` means the item does not exist.
    async fn get(&self, schema: &Schema) -> Result<Option<Option<Item>>> {
        let plain = self.index.is_none()
            && self.filters.is_empty()
            && self.order.is_none()
            && self.limit.is_none()
            && self.offset.is_none()
            && self.cursor.is_none();
        if !plain {
            return Ok(None);
        }
        let Some(key) = key_from_conditions(schema, self.client.codec(), &self.conditions)? else {
            return Ok(None);
        };
        let mut compiler = Compiler::new(schema, self.client.codec());
        compiler.projection(&self.projection)?;
        compiler.consistent_read(self.consistent());
        let request = compiler.finish()?;

        debug!(table = schema.table(), "reading item by key");
        let input = request.into_get_input(key);
        let output = self
            .client
            .send(&self.token, || self.client.transport().get_item(input.clone()))
            .await?;
        Ok(Some(output.item.filter(|item| !item.is_empty())))
    }

    /// The named index, or the one picked from the `where` clauses.
    fn read_index(&self, schema: &Schema) -> Option<String> {
        self.index
            .clone()
            .or_else(|| select_index(schema, &self.conditions, self.consistent()))
    }

    fn compile_read(&self, schema: &Schema, count: bool) -> Result<(CompiledRequest, bool)> {
        let mut compiler = Compiler::new(schema, self.client.codec());
        compiler.index(self.read_index(schema).as_deref())?;
        let is_query = compiler.where_clauses(&self.conditions)?;
        compiler.filter(&self.filters)?;
        if !count {
            compiler.projection(&self.projection)?;
        }
        compiler.limit(self.limit)?;
        compiler.forward(self.order != Some(SortOrder::Desc));
        compiler.consistent_read(self.consistent());
        compiler.select_count(count);
        Ok((compiler.finish()?, is_query))
    }

    fn compile_scan(&self, schema: &Schema) -> Result<CompiledRequest> {
        let mut compiler = Compiler::new(schema, self.client.codec());
        compiler.index(self.index.as_deref())?;
        compiler.where_filters(&self.conditions)?;
        compiler.filter(&self.filters)?;
        compiler.projection(&self.projection)?;
        compiler.limit(self.limit)?;
        compiler.consistent_read(self.consistent());
        compiler.finish()
    }

    fn start_key(&self, index: Option<&str>) -> Result<Option<Key>> {
        let Some(raw) = self.cursor.as_deref() else {
            return Ok(None);
        };
        let Some(cursor) = Cursor::decode(raw)? else {
            return Ok(None);
        };
        if cursor.index.as_deref() != index {
            return Err(Error::validation(format!(
                "cursor was issued for index {:?}, query uses {index:?}",
                cursor.index
            )));
        }
        Ok(Some(cursor.last_key))
    }

    async fn fetch(&self, request: CompiledRequest, is_query: bool) -> Result<Fetched> {
        let transport = self.client.transport();
        if is_query {
            let input = request.into_query_input();
            let out = self
                .client
                .send(&self.token, || transport.query(input.clone()))
                .await?;
            Ok(Fetched {
                items: out.items,
                last_key: out.last_evaluated_key.filter(|k| !k.is_empty()),
                count: out.count,
                scanned_count: out.scanned_count,
            })
        } else {
            let input = request.into_scan_input();
            let out = self
                .client
                .send(&self.token, || transport.scan(input.clone()))
                .await?;
            Ok(Fetched {
                items: out.items,
                last_key: out.last_evaluated_key.filter(|k| !k.is_empty()),
                count: out.count,
                scanned_count: out.scanned_count,
            })
        }
    }

    async fn collect(&self, schema: &Schema, cap: Option<usize>) -> Result<Vec<Item>> {
        let (request, is_query) = self.compile_read(schema, false)?;
        let mut start = self.start_key(request.index_name.as_deref())?;
        let mut items = Vec::new();
        let mut pages = 0usize;
        loop {
            let mut page_request = request.clone();
            page_request.exclusive_start_key = start.take();
            let page = self.fetch(page_request, is_query).await?;
            pages += 1;
            items.extend(page.items);
            if cap.is_some_and(|cap| items.len() >= cap) {
                break;
            }
            match page.last_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        if let Some(cap) = cap {
            items.truncate(cap);
        }
        debug!(pages, items = items.len(), is_query, "read complete");
        Ok(items)
    }

    async fn scan_segment(
        &self,
        base: &CompiledRequest,
        segment: i32,
        total: i32,
    ) -> Result<Vec<Item>> {
        let mut start = None;
        let mut items = Vec::new();
        loop {
            let mut request = base.clone();
            request.segment = Some((segment, total));
            request.exclusive_start_key = start.take();
            let page = self.fetch(request, false).await?;
            items.extend(page.items);
            match page.last_key {
                Some(key) => start = Some(key),
                None => break,
            }
        }
        Ok(items)
    }
}
