//! A scripted transport and fixture record for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tablekit_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, TransactWriteItemsInput, UpdateItemInput,
};
use tablekit_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, TransactWriteItemsOutput, UpdateItemOutput,
};
use tablekit_model::types::ScalarAttributeType;
use tablekit_model::{AttributeValue, Item, ServiceError};

use crate::client::Client;
use crate::schema::{IndexSpec, Record, Schema};
use crate::transport::Transport;

/// A request the transport received.
#[derive(Debug, Clone)]
pub(crate) enum Call {
    Get(GetItemInput),
    Put(PutItemInput),
    Update(UpdateItemInput),
    Delete(DeleteItemInput),
    Query(QueryInput),
    Scan(ScanInput),
    BatchGet(BatchGetItemInput),
    BatchWrite(BatchWriteItemInput),
    Transact(TransactWriteItemsInput),
}

/// A scripted response.
#[derive(Debug)]
pub(crate) enum Reply {
    Get(GetItemOutput),
    Put(PutItemOutput),
    Update(UpdateItemOutput),
    Delete(DeleteItemOutput),
    Query(QueryOutput),
    Scan(ScanOutput),
    BatchGet(BatchGetItemOutput),
    BatchWrite(BatchWriteItemOutput),
    Transact(TransactWriteItemsOutput),
    Error(ServiceError),
}

/// Records every call and answers from a queue. An empty queue answers with
/// the default output.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    calls: Mutex<Vec<Call>>,
    script: Mutex<VecDeque<Reply>>,
    segments: Vec<Vec<Item>>,
}

impl ScriptedTransport {
    pub(crate) fn new(script: Vec<Reply>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    /// Scans answer with `segments[input.segment]`.
    pub(crate) fn segmented(segments: Vec<Vec<Item>>) -> Self {
        Self {
            segments,
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn next(&self, call: Call) -> Option<Reply> {
        self.calls.lock().push(call);
        self.script.lock().pop_front()
    }
}

macro_rules! answer {
    ($self:ident, $call:expr, $variant:ident) => {
        match $self.next($call) {
            None => Ok(Default::default()),
            Some(Reply::$variant(out)) => Ok(out),
            Some(Reply::Error(e)) => Err(e),
            Some(other) => panic!("unexpected scripted reply {other:?}"),
        }
    };
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError> {
        answer!(self, Call::Get(input), Get)
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError> {
        answer!(self, Call::Put(input), Put)
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError> {
        answer!(self, Call::Update(input), Update)
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError> {
        answer!(self, Call::Delete(input), Delete)
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError> {
        answer!(self, Call::Query(input), Query)
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, ServiceError> {
        if !self.segments.is_empty() {
            let segment = usize::try_from(input.segment.unwrap_or_default()).unwrap();
            self.calls.lock().push(Call::Scan(input));
            let items = self.segments[segment].clone();
            return Ok(ScanOutput {
                count: i32::try_from(items.len()).unwrap(),
                scanned_count: i32::try_from(items.len()).unwrap(),
                items,
                ..ScanOutput::default()
            });
        }
        answer!(self, Call::Scan(input), Scan)
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, ServiceError> {
        answer!(self, Call::BatchGet(input), BatchGet)
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, ServiceError> {
        answer!(self, Call::BatchWrite(input), BatchWrite)
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, ServiceError> {
        answer!(self, Call::Transact(input), Transact)
    }
}

/// A client over a fresh scripted transport.
pub(crate) fn client_with(script: Vec<Reply>) -> (Client, Arc<ScriptedTransport>) {
    let transport = Arc::new(ScriptedTransport::new(script));
    (Client::new(transport.clone()), transport)
}

/// Fixture record: orders keyed by customer and order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Order {
    pub customer_id: String,
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub version: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Order {
    pub(crate) fn new(customer_id: &str, order_id: &str, status: &str) -> Self {
        Self {
            customer_id: customer_id.to_owned(),
            order_id: order_id.to_owned(),
            status: status.to_owned(),
            total: 0,
            tags: Vec::new(),
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Record for Order {
    fn schema() -> Schema {
        Schema::builder("orders")
            .partition_key("customer_id", ScalarAttributeType::S)
            .sort_key("order_id", ScalarAttributeType::S)
            .index(IndexSpec::global("by_status", "status", ScalarAttributeType::S))
            .version_field("version")
            .created_at("created_at")
            .updated_at("updated_at")
            .build()
    }
}

/// A stored order item.
pub(crate) fn order_item(customer_id: &str, order_id: &str, status: &str, total: i64) -> Item {
    Item::from([
        (
            "customer_id".to_owned(),
            AttributeValue::S(customer_id.to_owned()),
        ),
        ("order_id".to_owned(), AttributeValue::S(order_id.to_owned())),
        ("status".to_owned(), AttributeValue::S(status.to_owned())),
        ("total".to_owned(), AttributeValue::number(total)),
        ("version".to_owned(), AttributeValue::number(1)),
    ])
}
