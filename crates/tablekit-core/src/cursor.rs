//! Opaque pagination cursors.
//!
//! A cursor is URL-safe base64 (no padding) over
//! `{"lastKey": {...}, "index": "...", "sort": "ASC" | "DESC"}`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tablekit_model::Key;

use crate::error::{Error, Result};

/// Sort direction recorded in a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending sort-key order.
    #[serde(rename = "ASC")]
    Asc,
    /// Descending sort-key order.
    #[serde(rename = "DESC")]
    Desc,
}

/// Decoded cursor contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    /// `LastEvaluatedKey` of the page the cursor follows.
    #[serde(rename = "lastKey")]
    pub last_key: Key,
    /// Index the page was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    /// Order the page was read in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<SortOrder>,
}

impl Cursor {
    /// Encode. An empty key encodes as `""`.
    pub fn encode(&self) -> Result<String> {
        if self.last_key.is_empty() {
            return Ok(String::new());
        }
        let json = serde_json::to_vec(self)
            .map_err(|e| Error::codec(format!("failed to encode cursor: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode. `""` yields `None`.
    pub fn decode(cursor: &str) -> Result<Option<Self>> {
        let cursor = cursor.trim();
        if cursor.is_empty() {
            return Ok(None);
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|e| Error::validation(format!("malformed cursor: {e}")))?;
        let decoded: Self = serde_json::from_slice(&bytes)
            .map_err(|e| Error::validation(format!("malformed cursor: {e}")))?;
        Ok((!decoded.last_key.is_empty()).then_some(decoded))
    }
}
