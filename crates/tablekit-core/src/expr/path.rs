//! Document paths such as `address.city` or `tags[2]`.

use std::fmt;

use crate::error::{Error, Result};

/// Longest attribute name segment, in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// Deepest path, counting attribute and index segments.
pub const MAX_PATH_DEPTH: usize = 32;

/// One step of a document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A map key / attribute name.
    Attribute(String),
    /// A list index.
    Index(usize),
}

/// A validated path into an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPath {
    segments: Vec<Segment>,
}

impl DocumentPath {
    /// Parse `a.b[3].c`.
    pub fn parse(path: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(Error::validation("document path is empty"));
        }
        let mut segments = Vec::new();
        for part in path.split('.') {
            let (name, mut rest) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            check_name(name, path)?;
            segments.push(Segment::Attribute(name.to_owned()));
            while !rest.is_empty() {
                let Some(close) = rest.find(']') else {
                    return Err(bad_path(path, "unterminated list index"));
                };
                if !rest.starts_with('[') {
                    return Err(bad_path(path, "unexpected text after list index"));
                }
                let digits = &rest[1..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(bad_path(path, "list index must be a non-negative integer"));
                }
                let index = digits
                    .parse()
                    .map_err(|_| bad_path(path, "list index is too large"))?;
                segments.push(Segment::Index(index));
                rest = &rest[close + 1..];
            }
        }
        if segments.len() > MAX_PATH_DEPTH {
            return Err(bad_path(
                path,
                &format!("nesting exceeds {MAX_PATH_DEPTH} segments"),
            ));
        }
        Ok(Self { segments })
    }

    /// A one-segment path naming a top-level attribute.
    pub fn attribute(name: &str) -> Result<Self> {
        check_name(name, name)?;
        Ok(Self {
            segments: vec![Segment::Attribute(name.to_owned())],
        })
    }

    /// The top-level attribute the path starts at.
    #[must_use]
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(Segment::Attribute(name)) => name,
            _ => "",
        }
    }

    /// Replace the top-level attribute, keeping nested segments verbatim.
    #[must_use]
    pub fn with_root(mut self, root: String) -> Self {
        if let Some(first) = self.segments.first_mut() {
            *first = Segment::Attribute(root);
        }
        self
    }

    /// Append a list index.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    /// The segments, root first.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns `true` if either path is a prefix of the other; such paths may
    /// not appear together in one update.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.segments
            .iter()
            .zip(&other.segments)
            .all(|(a, b)| a == b)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Attribute(name) if i == 0 => f.write_str(name)?,
                Segment::Attribute(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

fn check_name(name: &str, path: &str) -> Result<()> {
    if name.is_empty() {
        return Err(bad_path(path, "empty segment"));
    }
    if name.len() > MAX_SEGMENT_LENGTH {
        return Err(bad_path(
            path,
            &format!("segment exceeds {MAX_SEGMENT_LENGTH} bytes"),
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| matches!(c, '#' | ':' | '[' | ']') || c.is_whitespace() || c.is_control())
    {
        return Err(bad_path(path, &format!("invalid character {c:?}")));
    }
    Ok(())
}

fn bad_path(path: &str, reason: &str) -> Error {
    Error::validation(format!("invalid document path `{path}`: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_nested_path() {
        let path = DocumentPath::parse("address.lines[2][0].zip").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Attribute("address".to_owned()),
                Segment::Attribute("lines".to_owned()),
                Segment::Index(2),
                Segment::Index(0),
                Segment::Attribute("zip".to_owned()),
            ]
        );
        assert_eq!(path.to_string(), "address.lines[2][0].zip");
        assert_eq!(path.root(), "address");
    }

    #[test]
    fn test_should_reject_invalid_paths() {
        for bad in ["", "a..b", "a b", "a#b", ":v", "a[-1]", "a[x]", "a[1", "[0]", "a[1]b"] {
            assert!(DocumentPath::parse(bad).is_err(), "{bad}");
        }
        assert!(DocumentPath::parse(&"x".repeat(256)).is_err());
        let deep = vec!["a"; 33].join(".");
        assert!(DocumentPath::parse(&deep).is_err());
        let ok = vec!["a"; 32].join(".");
        assert!(DocumentPath::parse(&ok).is_ok());
    }

    #[test]
    fn test_should_detect_overlapping_paths() {
        let a = DocumentPath::parse("a").unwrap();
        let ab = DocumentPath::parse("a.b").unwrap();
        let ac = DocumentPath::parse("a.c").unwrap();
        assert!(a.overlaps(&ab));
        assert!(ab.overlaps(&a));
        assert!(!ab.overlaps(&ac));
    }
}
