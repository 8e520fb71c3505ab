//! The caller-facing entry point.

use std::future::Future;
use std::sync::Arc;

use tablekit_model::ServiceError;
use tracing::debug;

use crate::batch::BatchExecutor;
use crate::cancel::CancellationToken;
use crate::codec::Codec;
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result, translate};
use crate::query::Query;
use crate::schema::{Record, Schema, SchemaRegistry};
use crate::transaction::TransactionBuilder;
use crate::transport::Transport;

/// A handle on one store. Cheap to clone; clones share the transport, codec
/// and schema cache.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    codec: Arc<Codec>,
    config: Arc<ClientConfig>,
    schemas: Arc<SchemaRegistry>,
}

impl Client {
    /// A client with the default configuration and codec.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    /// A client with an explicit configuration.
    #[must_use]
    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            transport,
            codec: Arc::new(Codec::new()),
            config: Arc::new(config),
            schemas: Arc::new(SchemaRegistry::new()),
        }
    }

    /// Replace the codec (custom converters, field encryption).
    #[must_use]
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Start a query or write against `T`'s table.
    #[must_use]
    pub fn model<T: Record>(&self) -> Query<'_, T> {
        Query::new(self, self.schemas.get::<T>())
    }

    /// Batch reads and writes.
    #[must_use]
    pub fn batch(&self) -> BatchExecutor<'_> {
        BatchExecutor::new(self)
    }

    /// An atomic multi-item write.
    #[must_use]
    pub fn transaction(&self) -> TransactionBuilder<'_> {
        TransactionBuilder::new(self)
    }

    /// The resolved schema of `T`.
    pub fn schema<T: Record>(&self) -> Result<Arc<Schema>> {
        self.schemas.get::<T>()
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The value codec.
    #[must_use]
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }
}

/// Run a transport call, aborting with [`Error::Canceled`] if `token` fires
/// first. The service error is returned untranslated.
pub(crate) async fn guarded<O>(
    token: &CancellationToken,
    call: impl Future<Output = Result<O, ServiceError>>,
) -> Result<Result<O, ServiceError>> {
    token.check()?;
    tokio::select! {
        out = call => Ok(out),
        () = token.cancelled() => Err(Error::Canceled),
    }
}

impl Client {
    /// Run a single-item or page request under `token` and translate its
    /// error. Throttled requests are re-issued on the request policy; the
    /// throttle surfaces once the policy runs out.
    pub(crate) async fn send<O, F, Fut>(&self, token: &CancellationToken, call: F) -> Result<O>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<O, ServiceError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match guarded(token, call()).await? {
                Ok(out) => return Ok(out),
                Err(e) => translate(e),
            };
            let Some(policy) = self
                .config
                .request_retry
                .as_ref()
                .filter(|p| err.kind() == ErrorKind::Throttled && attempt < p.max_retries)
            else {
                return Err(err);
            };
            let delay = policy.delay(attempt);
            debug!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "request throttled, retrying"
            );
            token.sleep(delay).await?;
            attempt += 1;
        }
    }
}
