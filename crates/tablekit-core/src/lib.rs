//! Typed records, expression compilation and resilient executors for tablekit.
//!
//! A [`Client`] wraps a [`Transport`]. Records declare their table through
//! [`Record::schema`]; every read and write is built with a [`Query`] and
//! compiled into placeholder-safe expressions before anything is sent.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod aggregate;
pub mod batch;
pub mod cancel;
pub mod client;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod error;
pub mod expr;
mod index;
mod item;
pub mod query;
pub mod retry;
pub mod schema;
pub mod transaction;
pub mod transport;
pub mod update;
pub mod value;
mod write;

#[cfg(test)]
mod testing;

pub use aggregate::{AggregateResult, GROUP_COUNT, Group, GroupBy};
pub use batch::{
    BatchExecutor, BatchGetOptions, BatchGetReport, BatchWriteOptions, ChunkDecision, WriteOp,
};
pub use cancel::CancellationToken;
pub use client::Client;
pub use codec::Codec;
pub use config::ClientConfig;
pub use cursor::{Cursor, SortOrder};
pub use error::{Error, ErrorKind, Result};
pub use expr::Operator;
pub use item::RecordKey;
pub use query::{Page, Query};
pub use retry::RetryPolicy;
pub use schema::{FieldSpec, IndexSpec, NamingConvention, Record, Schema};
pub use transaction::{TransactCondition, TransactionBuilder};
pub use transport::Transport;
pub use update::{Attributes, UpdateBuilder, UpdateOps, UpdateSpec};
pub use value::Value;
