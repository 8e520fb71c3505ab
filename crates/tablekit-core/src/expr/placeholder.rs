//! Placeholder allocation shared by every fragment of one request.

use std::collections::BTreeMap;

use tablekit_model::AttributeValue;
use tablekit_model::types::{ExpressionAttributeNames, ExpressionAttributeValues};

use super::path::{DocumentPath, Segment};
use crate::error::{Error, Result};

/// Allocates `#n{k}` name and `:v{k}` value placeholders.
///
/// A real attribute name always maps to the same name placeholder; every
/// literal gets a fresh value placeholder. Counters start at 1.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    names: ExpressionAttributeNames,
    by_name: BTreeMap<String, String>,
    values: ExpressionAttributeValues,
    next_name: usize,
    next_value: usize,
}

impl Placeholders {
    /// An empty allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The placeholder for a real attribute name.
    pub fn name(&mut self, real: &str) -> String {
        if let Some(existing) = self.by_name.get(real) {
            return existing.clone();
        }
        self.next_name += 1;
        let placeholder = format!("#n{}", self.next_name);
        self.names.insert(placeholder.clone(), real.to_owned());
        self.by_name.insert(real.to_owned(), placeholder.clone());
        placeholder
    }

    /// A fresh placeholder bound to `value`.
    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = loop {
            self.next_value += 1;
            let candidate = format!(":v{}", self.next_value);
            if !self.values.contains_key(&candidate) {
                break candidate;
            }
        };
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Render a document path with one name placeholder per attribute
    /// segment, e.g. `#n1.#n2[3]`.
    pub fn path(&mut self, path: &DocumentPath) -> String {
        let mut out = String::new();
        for segment in path.segments() {
            match segment {
                Segment::Attribute(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    let placeholder = self.name(name);
                    out.push_str(&placeholder);
                }
                Segment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    /// Bind a caller-chosen value placeholder from a raw expression.
    pub fn reserve_value(&mut self, placeholder: &str, value: AttributeValue) -> Result<()> {
        let valid = placeholder.len() > 1
            && placeholder.starts_with(':')
            && placeholder[1..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::validation(format!(
                "`{placeholder}` is not a valid value placeholder"
            )));
        }
        if self.values.contains_key(placeholder) {
            return Err(Error::validation(format!(
                "value placeholder `{placeholder}` is already in use"
            )));
        }
        self.values.insert(placeholder.to_owned(), value);
        Ok(())
    }

    /// Name placeholders allocated so far.
    #[must_use]
    pub fn names(&self) -> &ExpressionAttributeNames {
        &self.names
    }

    /// Value placeholders allocated so far.
    #[must_use]
    pub fn values(&self) -> &ExpressionAttributeValues {
        &self.values
    }

    /// Consume the allocator, returning both maps.
    #[must_use]
    pub fn into_maps(self) -> (ExpressionAttributeNames, ExpressionAttributeValues) {
        (self.names, self.values)
    }
}
