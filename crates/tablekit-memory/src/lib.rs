//! In-process DynamoDB store for tablekit.
//!
//! [`MemoryTransport`] implements [`tablekit_core::Transport`] over ordered
//! in-memory tables. It parses and evaluates condition, key-condition,
//! update and projection expressions, pages queries and scans, applies
//! batches and all-or-nothing transactions, and can be scripted to fail in
//! the ways the real service fails.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod error;
pub mod expression;
pub mod faults;
pub mod state;
pub mod storage;
pub mod transport;

pub use faults::FaultPlan;
pub use state::StoreState;
pub use storage::{KeyAttribute, KeySchema, StorageError, TableDefinition, TableStorage};
pub use transport::MemoryTransport;
