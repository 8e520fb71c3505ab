//! Predicate trees for key conditions, filters and write conditions.

use std::str::FromStr;

use crate::error::{Error, Result};
use crate::value::Value;

/// Most operands an `IN` comparison may carry.
pub const MAX_IN_OPERANDS: usize = 100;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `BETWEEN :a AND :b`; the value is a two-element list.
    Between,
    /// `IN (...)`; the value is a list of 1 to 100 elements.
    In,
    /// `begins_with(path, :v)`
    BeginsWith,
    /// `contains(path, :v)`
    Contains,
    /// `NOT contains(path, :v)`
    NotContains,
    /// `attribute_exists(path)`
    Exists,
    /// `attribute_not_exists(path)`
    NotExists,
}

impl Operator {
    /// Returns `true` if the operator compares against a value.
    #[must_use]
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::Exists | Self::NotExists)
    }

    /// Returns `true` if the operator is allowed in a key condition on the
    /// partition key (`sort == false`) or the sort key.
    #[must_use]
    pub fn is_key_operator(&self, sort: bool) -> bool {
        if sort {
            matches!(
                self,
                Self::Eq | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Between | Self::BeginsWith
            )
        } else {
            *self == Self::Eq
        }
    }
}

impl AsRef<str> for Operator {
    fn as_ref(&self) -> &str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Between => "BETWEEN",
            Self::In => "IN",
            Self::BeginsWith => "BEGINS_WITH",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::Exists => "EXISTS",
            Self::NotExists => "NOT_EXISTS",
        }
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let op = match s.trim().to_ascii_uppercase().as_str() {
            "=" | "==" | "EQ" => Self::Eq,
            "!=" | "<>" | "NE" => Self::Ne,
            "<" | "LT" => Self::Lt,
            "<=" | "LE" => Self::Le,
            ">" | "GT" => Self::Gt,
            ">=" | "GE" => Self::Ge,
            "BETWEEN" => Self::Between,
            "IN" => Self::In,
            "BEGINS_WITH" => Self::BeginsWith,
            "CONTAINS" => Self::Contains,
            "NOT_CONTAINS" => Self::NotContains,
            "EXISTS" | "ATTRIBUTE_EXISTS" => Self::Exists,
            "NOT_EXISTS" | "ATTRIBUTE_NOT_EXISTS" => Self::NotExists,
            _ => return Err(Error::validation(format!("unknown operator `{s}`"))),
        };
        Ok(op)
    }
}

/// Anything builder methods accept as an operator: an [`Operator`] or its
/// textual spelling.
pub trait IntoOperator {
    /// Resolve to an operator.
    fn into_operator(self) -> Result<Operator>;
}

impl IntoOperator for Operator {
    fn into_operator(self) -> Result<Operator> {
        Ok(self)
    }
}

impl IntoOperator for &str {
    fn into_operator(self) -> Result<Operator> {
        self.parse()
    }
}

/// A single comparison `field op value`.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCompare {
    /// Field name or document path; the root resolves through the schema.
    pub field: String,
    /// The operator.
    pub op: Operator,
    /// The operand (ignored by `Exists`/`NotExists`).
    pub value: Value,
    /// Compare `size(field)` instead of the field itself.
    pub size: bool,
}

impl FieldCompare {
    /// Compare a field.
    pub fn new(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
            size: false,
        }
    }

    /// Compare `size(field)`.
    pub fn size(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Self {
            size: true,
            ..Self::new(field, op, value)
        }
    }
}

/// How a predicate attaches to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Joiner {
    /// `AND`
    #[default]
    And,
    /// `OR`
    Or,
}

impl Joiner {
    /// The keyword, padded with spaces.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::And => " AND ",
            Self::Or => " OR ",
        }
    }
}

/// A predicate tree node. The joiner of a group's first child is ignored.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// A single comparison.
    Compare(FieldCompare),
    /// A parenthesised sequence.
    Group(Vec<(Predicate, Joiner)>),
}

impl Predicate {
    /// Build a group from a closure.
    pub fn group(build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Result<Self> {
        build(GroupBuilder::default()).build()
    }
}

impl From<FieldCompare> for Predicate {
    fn from(compare: FieldCompare) -> Self {
        Self::Compare(compare)
    }
}

/// Builder for [`Predicate::Group`]. The first invalid call is remembered
/// and reported by [`GroupBuilder::build`].
#[derive(Debug, Default)]
pub struct GroupBuilder {
    items: Vec<(Predicate, Joiner)>,
    error: Option<Error>,
}

impl GroupBuilder {
    /// `AND field op value`
    #[must_use]
    pub fn filter(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_compare(field, op, value, false, Joiner::And)
    }

    /// `OR field op value`
    #[must_use]
    pub fn or_filter(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_compare(field, op, value, false, Joiner::Or)
    }

    /// `AND size(field) op value`
    #[must_use]
    pub fn filter_size(self, field: &str, op: impl IntoOperator, value: impl Into<Value>) -> Self {
        self.push_compare(field, op, value, true, Joiner::And)
    }

    /// `AND (nested group)`
    #[must_use]
    pub fn group(self, build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        self.push_group(build, Joiner::And)
    }

    /// `OR (nested group)`
    #[must_use]
    pub fn or_group(self, build: impl FnOnce(GroupBuilder) -> GroupBuilder) -> Self {
        self.push_group(build, Joiner::Or)
    }

    /// Finish the group.
    pub fn build(self) -> Result<Predicate> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(Predicate::Group(self.items)),
        }
    }

    fn push_compare(
        mut self,
        field: &str,
        op: impl IntoOperator,
        value: impl Into<Value>,
        size: bool,
        joiner: Joiner,
    ) -> Self {
        if self.error.is_some() {
            return self;
        }
        match op.into_operator() {
            Ok(op) => {
                let compare = FieldCompare {
                    field: field.to_owned(),
                    op,
                    value: value.into(),
                    size,
                };
                self.items.push((Predicate::Compare(compare), joiner));
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn push_group(mut self, build: impl FnOnce(GroupBuilder) -> GroupBuilder, joiner: Joiner) -> Self {
        if self.error.is_some() {
            return self;
        }
        match Predicate::group(build) {
            Ok(group) => self.items.push((group, joiner)),
            Err(e) => self.error = Some(e),
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_operator_spellings() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!("ne".parse::<Operator>().unwrap(), Operator::Ne);
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::Ne);
        assert_eq!("begins_with".parse::<Operator>().unwrap(), Operator::BeginsWith);
        assert_eq!(
            "Attribute_Not_Exists".parse::<Operator>().unwrap(),
            Operator::NotExists
        );
        assert!("LIKE".parse::<Operator>().is_err());
    }

    #[test]
    fn test_should_restrict_key_operators() {
        assert!(Operator::Eq.is_key_operator(false));
        assert!(!Operator::Lt.is_key_operator(false));
        assert!(Operator::BeginsWith.is_key_operator(true));
        assert!(!Operator::Ne.is_key_operator(true));
        assert!(!Operator::In.is_key_operator(true));
    }

    #[test]
    fn test_should_keep_declared_group_order() {
        let group = Predicate::group(|g| {
            g.filter("status", "=", "PAID")
                .or_filter("status", Operator::Eq, "SHIPPED")
        })
        .unwrap();
        let Predicate::Group(items) = group else {
            panic!("expected group");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].1, Joiner::Or);
    }

    #[test]
    fn test_should_report_first_builder_error() {
        let err = Predicate::group(|g| g.filter("a", "~", 1).filter("b", "??", 2)).unwrap_err();
        assert!(err.to_string().contains('~'));
    }
}
