//! Syntax trees for condition, key-condition, update and projection
//! expressions, plus a walker that gathers the `#name` and `:value`
//! placeholders an expression references.

use std::collections::BTreeSet;
use std::fmt;

/// Condition, filter or key-condition expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// `left op right`
    Compare {
        /// Left-hand operand.
        left: Operand,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand operand.
        right: Operand,
    },
    /// `value BETWEEN low AND high`, inclusive.
    Between {
        /// Value to test.
        value: Operand,
        /// Lower bound.
        low: Operand,
        /// Upper bound.
        high: Operand,
    },
    /// `value IN (a, b, ...)`
    In {
        /// Value to search for.
        value: Operand,
        /// Candidates.
        list: Vec<Operand>,
    },
    /// `left AND right` / `left OR right`
    Logical {
        /// Logical operator.
        op: LogicalOp,
        /// Left-hand expression.
        left: Box<Expr>,
        /// Right-hand expression.
        right: Box<Expr>,
    },
    /// `NOT expr`
    Not(Box<Expr>),
    /// `function(args...)`
    Function {
        /// Function name.
        name: FunctionName,
        /// Arguments.
        args: Vec<Operand>,
    },
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
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
}

impl CompareOp {
    /// The operator seen from the other side: `a < b` is `b > a`.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        })
    }
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `AND`
    And,
    /// `OR`
    Or,
}

/// Functions usable as a whole condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    /// `attribute_exists(path)`
    AttributeExists,
    /// `attribute_not_exists(path)`
    AttributeNotExists,
    /// `attribute_type(path, :type)`
    AttributeType,
    /// `begins_with(path, :prefix)`
    BeginsWith,
    /// `contains(path, :operand)`
    Contains,
}

impl FunctionName {
    /// Number of arguments the function takes.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::AttributeExists | Self::AttributeNotExists => 1,
            Self::AttributeType | Self::BeginsWith | Self::Contains => 2,
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AttributeExists => "attribute_exists",
            Self::AttributeNotExists => "attribute_not_exists",
            Self::AttributeType => "attribute_type",
            Self::BeginsWith => "begins_with",
            Self::Contains => "contains",
        })
    }
}

/// Something that produces a value.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A document path such as `#n1.#n2[3]`.
    Path(AttributePath),
    /// A value placeholder, stored with its leading `:`.
    Value(String),
    /// `size(path)`
    Size(AttributePath),
}

/// A document path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    /// Elements in order; the first is always an attribute.
    pub elements: Vec<PathElement>,
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            match element {
                PathElement::Attribute(name) if i == 0 => write!(f, "{name}")?,
                PathElement::Attribute(name) => write!(f, ".{name}")?,
                PathElement::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// One path element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    /// A bare attribute name, or a `#placeholder` kept with its `#`.
    Attribute(String),
    /// `[n]`
    Index(usize),
}

/// A parsed update expression.
#[derive(Debug, Clone, Default)]
pub struct UpdateExpr {
    /// `SET path = value, ...`
    pub set_actions: Vec<SetAction>,
    /// `REMOVE path, ...`
    pub remove_paths: Vec<AttributePath>,
    /// `ADD path value, ...`
    pub add_actions: Vec<PathValue>,
    /// `DELETE path value, ...`
    pub delete_actions: Vec<PathValue>,
}

impl UpdateExpr {
    /// Returns `true` if no clause has any action.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set_actions.is_empty()
            && self.remove_paths.is_empty()
            && self.add_actions.is_empty()
            && self.delete_actions.is_empty()
    }

    /// Every path the expression writes to.
    pub fn target_paths(&self) -> impl Iterator<Item = &AttributePath> {
        self.set_actions
            .iter()
            .map(|a| &a.path)
            .chain(self.remove_paths.iter())
            .chain(self.add_actions.iter().map(|a| &a.path))
            .chain(self.delete_actions.iter().map(|a| &a.path))
    }
}

/// `path = value`
#[derive(Debug, Clone)]
pub struct SetAction {
    /// Target.
    pub path: AttributePath,
    /// Right-hand side.
    pub value: SetValue,
}

/// Right-hand side of a SET action.
#[derive(Debug, Clone)]
pub enum SetValue {
    /// Plain operand.
    Operand(Operand),
    /// `a + b`
    Plus(Box<SetValue>, Box<SetValue>),
    /// `a - b`
    Minus(Box<SetValue>, Box<SetValue>),
    /// `if_not_exists(path, operand)`
    IfNotExists(AttributePath, Operand),
    /// `list_append(a, b)`
    ListAppend(Operand, Operand),
}

/// `path value`, as used by ADD and DELETE.
#[derive(Debug, Clone)]
pub struct PathValue {
    /// Target.
    pub path: AttributePath,
    /// Operand, normally a value placeholder.
    pub value: Operand,
}

/// Placeholders referenced by one or more expressions.
#[derive(Debug, Default)]
pub struct Placeholders {
    /// `#name` references.
    pub names: BTreeSet<String>,
    /// `:value` references.
    pub values: BTreeSet<String>,
}

impl Placeholders {
    /// Record the placeholders of a condition.
    pub fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Compare { left, right, .. } => {
                self.visit_operand(left);
                self.visit_operand(right);
            }
            Expr::Between { value, low, high } => {
                self.visit_operand(value);
                self.visit_operand(low);
                self.visit_operand(high);
            }
            Expr::In { value, list } => {
                self.visit_operand(value);
                list.iter().for_each(|o| self.visit_operand(o));
            }
            Expr::Logical { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::Not(inner) => self.visit_expr(inner),
            Expr::Function { args, .. } => args.iter().for_each(|o| self.visit_operand(o)),
        }
    }

    /// Record the placeholders of an update.
    pub fn visit_update(&mut self, update: &UpdateExpr) {
        for action in &update.set_actions {
            self.visit_path(&action.path);
            self.visit_set_value(&action.value);
        }
        update.remove_paths.iter().for_each(|p| self.visit_path(p));
        for action in update.add_actions.iter().chain(&update.delete_actions) {
            self.visit_path(&action.path);
            self.visit_operand(&action.value);
        }
    }

    /// Record the placeholders of a document path.
    pub fn visit_path(&mut self, path: &AttributePath) {
        for element in &path.elements {
            if let PathElement::Attribute(name) = element {
                if name.starts_with('#') {
                    self.names.insert(name.clone());
                }
            }
        }
    }

    fn visit_operand(&mut self, operand: &Operand) {
        match operand {
            Operand::Path(path) | Operand::Size(path) => self.visit_path(path),
            Operand::Value(name) => {
                self.values.insert(name.clone());
            }
        }
    }

    fn visit_set_value(&mut self, value: &SetValue) {
        match value {
            SetValue::Operand(o) => self.visit_operand(o),
            SetValue::Plus(a, b) | SetValue::Minus(a, b) => {
                self.visit_set_value(a);
                self.visit_set_value(b);
            }
            SetValue::IfNotExists(path, o) => {
                self.visit_path(path);
                self.visit_operand(o);
            }
            SetValue::ListAppend(a, b) => {
                self.visit_operand(a);
                self.visit_operand(b);
            }
        }
    }
}
