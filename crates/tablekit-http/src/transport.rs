//! [`Transport`] over the DynamoDB JSON protocol.
//!
//! Every operation is a `POST /` whose `X-Amz-Target` header names the
//! operation:
//!
//! ```text
//! X-Amz-Target: DynamoDB_20120810.PutItem
//! Content-Type: application/x-amz-json-1.0
//! ```

use async_trait::async_trait;
use http::header::CONTENT_TYPE;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use tablekit_core::Transport;
use tablekit_model::input::{
    BatchGetItemInput, BatchWriteItemInput, DeleteItemInput, GetItemInput, PutItemInput,
    QueryInput, ScanInput, TransactWriteItemsInput, UpdateItemInput,
};
use tablekit_model::output::{
    BatchGetItemOutput, BatchWriteItemOutput, DeleteItemOutput, GetItemOutput, PutItemOutput,
    QueryOutput, ScanOutput, TransactWriteItemsOutput, UpdateItemOutput,
};
use tablekit_model::{Operation, ServiceError, ServiceErrorCode};

use crate::config::HttpTransportConfig;

/// Content type of every request and response body.
pub const AMZ_JSON: &str = "application/x-amz-json-1.0";

/// Header carrying the operation name.
pub const TARGET_HEADER: &str = "x-amz-target";

/// Header carrying the CRC32 of the response body.
pub const CRC32_HEADER: &str = "x-amz-crc32";

/// Sends wire requests to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    /// Build a transport from configuration.
    pub fn new(config: HttpTransportConfig) -> Result<Self, ServiceError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            ServiceError::with_message(
                ServiceErrorCode::RequestFailure,
                "failed to build HTTP client",
            )
            .with_source(e)
        })?;
        Ok(Self { client, config })
    }

    /// Build a transport from `TABLEKIT_*` environment variables.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::new(HttpTransportConfig::from_env())
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &HttpTransportConfig {
        &self.config
    }

    async fn send<I, O>(&self, operation: Operation, input: &I) -> Result<O, ServiceError>
    where
        I: Serialize + Sync,
        O: DeserializeOwned,
    {
        let body = serde_json::to_vec(input).map_err(|e| {
            ServiceError::with_message(
                ServiceErrorCode::SerializationException,
                format!("failed to serialize {operation} request"),
            )
            .with_source(e)
        })?;

        debug!(%operation, bytes = body.len(), "sending request");
        let response = self
            .client
            .post(&self.config.endpoint_url)
            .header(CONTENT_TYPE, AMZ_JSON)
            .header(TARGET_HEADER, operation.target())
            .body(body)
            .send()
            .await
            .map_err(|e| request_failure(operation, "request failed", e))?;

        let status = response.status();
        let expected_crc = response
            .headers()
            .get(CRC32_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok());
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_failure(operation, "failed to read response body", e))?;
        debug!(%operation, status = status.as_u16(), bytes = bytes.len(), "received response");

        if self.config.verify_crc32 {
            verify_crc32(operation, expected_crc, &bytes)?;
        }

        if !status.is_success() {
            let err = ServiceError::from_body(status, &bytes);
            debug!(%operation, code = %err.code, "service returned an error");
            return Err(err);
        }

        serde_json::from_slice(&bytes)
            .map_err(|e| request_failure(operation, "undecodable response body", e))
    }
}

fn request_failure(
    operation: Operation,
    what: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> ServiceError {
    warn!(%operation, error = %source, "{what}");
    ServiceError::with_message(ServiceErrorCode::RequestFailure, format!("{operation}: {what}"))
        .with_source(source)
}

/// Compare the body checksum with the header, when the header is present.
fn verify_crc32(operation: Operation, expected: Option<u32>, body: &[u8]) -> Result<(), ServiceError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let actual = crc32fast::hash(body);
    if actual == expected {
        Ok(())
    } else {
        warn!(%operation, expected, actual, "response checksum mismatch");
        Err(ServiceError::with_message(
            ServiceErrorCode::RequestFailure,
            format!("{operation}: response CRC32 {actual} does not match header {expected}"),
        ))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_item(&self, input: GetItemInput) -> Result<GetItemOutput, ServiceError> {
        self.send(Operation::GetItem, &input).await
    }

    async fn put_item(&self, input: PutItemInput) -> Result<PutItemOutput, ServiceError> {
        self.send(Operation::PutItem, &input).await
    }

    async fn update_item(&self, input: UpdateItemInput) -> Result<UpdateItemOutput, ServiceError> {
        self.send(Operation::UpdateItem, &input).await
    }

    async fn delete_item(&self, input: DeleteItemInput) -> Result<DeleteItemOutput, ServiceError> {
        self.send(Operation::DeleteItem, &input).await
    }

    async fn query(&self, input: QueryInput) -> Result<QueryOutput, ServiceError> {
        self.send(Operation::Query, &input).await
    }

    async fn scan(&self, input: ScanInput) -> Result<ScanOutput, ServiceError> {
        self.send(Operation::Scan, &input).await
    }

    async fn batch_get_item(
        &self,
        input: BatchGetItemInput,
    ) -> Result<BatchGetItemOutput, ServiceError> {
        self.send(Operation::BatchGetItem, &input).await
    }

    async fn batch_write_item(
        &self,
        input: BatchWriteItemInput,
    ) -> Result<BatchWriteItemOutput, ServiceError> {
        self.send(Operation::BatchWriteItem, &input).await
    }

    async fn transact_write_items(
        &self,
        input: TransactWriteItemsInput,
    ) -> Result<TransactWriteItemsOutput, ServiceError> {
        self.send(Operation::TransactWriteItems, &input).await
    }
}
