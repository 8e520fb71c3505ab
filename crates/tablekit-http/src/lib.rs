//! JSON-over-HTTP transport for tablekit.
//!
//! [`HttpTransport`] implements [`tablekit_core::Transport`] against any
//! endpoint that speaks the DynamoDB `20120810` JSON protocol, such as a
//! local emulator. Requests are not signed.
#![allow(clippy::doc_markdown, clippy::module_name_repetitions)]

pub mod config;
pub mod transport;

pub use config::HttpTransportConfig;
pub use transport::HttpTransport;
