//! Wire model types for the tablekit DynamoDB client.
//!
//! These are the JSON request and response shapes of the DynamoDB `20120810`
//! protocol that the client issues, plus the tagged `AttributeValue` union and
//! the protocol error codes. Maps are `BTreeMap` throughout so that a serialized
//! request is byte-for-byte reproducible.
// "DynamoDB" appears in virtually every doc comment in this crate.
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(missing_docs)]

pub mod attribute_value;
pub mod error;
pub mod input;
pub mod operations;
pub mod output;
pub mod types;

pub use attribute_value::AttributeValue;
pub use error::{ServiceError, ServiceErrorCode};
pub use operations::Operation;
pub use types::{Item, Key};
