//! End-to-end tests of tablekit against [`MemoryTransport`].
//!
//! Every test builds a fresh store, so tests run in parallel without
//! sharing tables:
//! ```text
//! cargo test -p tablekit-integration
//! ```

use std::sync::{Arc, Once};

use serde::{Deserialize, Serialize};
use tablekit_core::{Client, ClientConfig, IndexSpec, Record, Schema};
use tablekit_memory::MemoryTransport;
use tablekit_model::types::ScalarAttributeType;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A versioned record with a composite key and a status index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Partition key.
    pub customer_id: String,
    /// Sort key.
    pub order_id: String,
    /// Indexed by `by_status`.
    pub status: String,
    /// Order total in cents.
    pub total: i64,
    /// Optimistic-lock version.
    #[serde(default)]
    pub version: i64,
}

impl Order {
    /// A fresh order at version 0.
    #[must_use]
    pub fn new(customer_id: &str, order_id: &str, status: &str, total: i64) -> Self {
        Self {
            customer_id: customer_id.to_owned(),
            order_id: order_id.to_owned(),
            status: status.to_owned(),
            total,
            version: 0,
        }
    }
}

impl Record for Order {
    fn schema() -> Schema {
        Schema::builder("orders")
            .partition_key("customer_id", ScalarAttributeType::S)
            .sort_key("order_id", ScalarAttributeType::S)
            .index(IndexSpec::global(
                "by_status",
                "status",
                ScalarAttributeType::S,
            ))
            .version_field("version")
            .build()
    }
}

/// An unversioned record with a single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Partition key.
    pub id: String,
    /// Balance in cents.
    pub balance: i64,
}

impl Account {
    /// An account holding `balance`.
    #[must_use]
    pub fn new(id: &str, balance: i64) -> Self {
        Self {
            id: id.to_owned(),
            balance,
        }
    }
}

impl Record for Account {
    fn schema() -> Schema {
        Schema::builder("accounts")
            .partition_key("id", ScalarAttributeType::S)
            .build()
    }
}

/// A record with audit timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Partition key.
    pub id: String,
    /// Free text.
    pub body: String,
    /// Set on create.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Set on every write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl Note {
    /// A note that has never been stored.
    #[must_use]
    pub fn new(id: &str, body: &str) -> Self {
        Self {
            id: id.to_owned(),
            body: body.to_owned(),
            created_at: None,
            updated_at: None,
        }
    }
}

impl Record for Note {
    fn schema() -> Schema {
        Schema::builder("notes")
            .partition_key("id", ScalarAttributeType::S)
            .created_at("created_at")
            .updated_at("updated_at")
            .build()
    }
}

/// A store with the `orders`, `accounts` and `notes` tables and a client
/// over it.
#[derive(Debug)]
pub struct Harness {
    /// The store, for request counts and fault injection.
    pub store: Arc<MemoryTransport>,
    /// Client bound to `store`.
    pub client: Client,
}

/// Harness with default paging and configuration.
#[must_use]
pub fn harness() -> Harness {
    harness_with(MemoryTransport::new(), ClientConfig::default())
}

/// Harness over `store` with `config`.
#[must_use]
pub fn harness_with(store: MemoryTransport, config: ClientConfig) -> Harness {
    init_tracing();

    store
        .create_table_for::<Order>()
        .unwrap_or_else(|e| panic!("failed to create orders table: {e}"));
    store
        .create_table_for::<Account>()
        .unwrap_or_else(|e| panic!("failed to create accounts table: {e}"));
    store
        .create_table_for::<Note>()
        .unwrap_or_else(|e| panic!("failed to create notes table: {e}"));
    let store = Arc::new(store);
    let client = Client::with_config(store.clone(), config);
    Harness { store, client }
}

mod test_batch;
mod test_guards;
mod test_paging;
mod test_placeholders;
mod test_retry;
mod test_transaction;
