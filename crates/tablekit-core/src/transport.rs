//! The seam between the executors and whatever actually speaks the protocol.

use std::fmt;

use async_trait::async_trait;
use tablekit_model::ServiceError;
use tablekit_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, TransactWriteItemsInput, UpdateItemInput,
};
use tablekit_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, TransactWriteItemsOutput, UpdateItemOutput,
};

/// Sends wire requests and returns wire responses. Implementations never
/// interpret error codes; the executors translate them.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// `GetItem`
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError>;

    /// `PutItem`
    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError>;

    /// `UpdateItem`
    async fn update_item(&self, input: UpdateItemInput)
    -> Result<UpdateItemOutput, ServiceError>;

    /// `DeleteItem`
    async fn delete_item(&self, input: DeleteItemInput)
    -> Result<DeleteItemOutput, ServiceError>;

    /// `Query`
    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError>;

    /// `Scan`
    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, ServiceError>;

    /// `BatchGetItem`
    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, ServiceError>;

    /// `BatchWriteItem`
    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, ServiceError>;

    /// `TransactWriteItems`
    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, ServiceError>;
}
