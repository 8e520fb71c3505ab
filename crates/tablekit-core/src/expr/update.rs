//! Update operations and the clauses they compile into.

use crate::value::Value;

/// The four clauses of an update expression, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Clause {
    /// `SET`
    Set,
    /// `REMOVE`
    Remove,
    /// `ADD`
    Add,
    /// `DELETE`
    Delete,
}

impl Clause {
    /// All clauses in emission order.
    pub const ORDER: [Clause; 4] = [Clause::Set, Clause::Remove, Clause::Add, Clause::Delete];

    /// The clause keyword.
    #[must_use]
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Set => "SET",
            Self::Remove => "REMOVE",
            Self::Add => "ADD",
            Self::Delete => "DELETE",
        }
    }
}

/// One mutation of an item.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `SET #f = :v`
    Set {
        /// Target field or path.
        field: String,
        /// New value.
        value: Value,
    },
    /// `SET #f = if_not_exists(#f, :v)`
    SetIfNotExists {
        /// Target field or path.
        field: String,
        /// Value stored only when the attribute is absent.
        value: Value,
    },
    /// `ADD #f :v` on a number or set.
    Add {
        /// Target field.
        field: String,
        /// Number delta or set of members to add.
        delta: Value,
    },
    /// `ADD #f 1`
    Increment(String),
    /// `ADD #f -1`
    Decrement(String),
    /// `REMOVE #f`
    Remove(String),
    /// `DELETE #f :v`; a scalar is promoted to a one-element set.
    DeleteFromSet {
        /// Target set field.
        field: String,
        /// Members to delete.
        value: Value,
    },
    /// `SET #f = list_append(#f, :v)`
    AppendToList {
        /// Target list field.
        field: String,
        /// Elements appended in order.
        values: Vec<Value>,
    },
    /// `SET #f = list_append(:v, #f)`
    PrependToList {
        /// Target list field.
        field: String,
        /// Elements prepended in order.
        values: Vec<Value>,
    },
    /// `REMOVE #f[i]`
    RemoveFromListAt {
        /// Target list field.
        field: String,
        /// Element index.
        index: usize,
    },
    /// `SET #f[i] = :v`
    SetListElement {
        /// Target list field.
        field: String,
        /// Element index.
        index: usize,
        /// New element value.
        value: Value,
    },
}

impl UpdateOp {
    /// The clause this operation is emitted into.
    #[must_use]
    pub fn clause(&self) -> Clause {
        match self {
            Self::Set { .. }
            | Self::SetIfNotExists { .. }
            | Self::AppendToList { .. }
            | Self::PrependToList { .. }
            | Self::SetListElement { .. } => Clause::Set,
            Self::Remove(_) | Self::RemoveFromListAt { .. } => Clause::Remove,
            Self::Add { .. } | Self::Increment(_) | Self::Decrement(_) => Clause::Add,
            Self::DeleteFromSet { .. } => Clause::Delete,
        }
    }

    /// The field (or path) the operation targets.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Self::Set { field, .. }
            | Self::SetIfNotExists { field, .. }
            | Self::Add { field, .. }
            | Self::DeleteFromSet { field, .. }
            | Self::AppendToList { field, .. }
            | Self::PrependToList { field, .. }
            | Self::RemoveFromListAt { field, .. }
            | Self::SetListElement { field, .. }
            | Self::Increment(field)
            | Self::Decrement(field)
            | Self::Remove(field) => field,
        }
    }

    /// The list index the operation addresses, if any.
    #[must_use]
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::RemoveFromListAt { index, .. } | Self::SetListElement { index, .. } => {
                Some(*index)
            }
            _ => None,
        }
    }
}
