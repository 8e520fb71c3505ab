//! Evaluates parsed expressions against an item: conditions to booleans,
//! updates to a new item, projections to a reduced item.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tablekit_model::types::{ExpressionAttributeNames, ExpressionAttributeValues};
use tablekit_model::{AttributeValue, Item};

use super::ast::{
    AttributePath, CompareOp, Expr, FunctionName, LogicalOp, Operand, PathElement, PathValue,
    SetValue, UpdateExpr,
};
use super::parser::ExpressionError;

/// An item bound to the name and value maps of one request.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The item under evaluation; empty when no item is stored.
    pub item: &'a Item,
    /// `#name` substitutions.
    pub names: &'a ExpressionAttributeNames,
    /// `:value` substitutions.
    pub values: &'a ExpressionAttributeValues,
}

/// A path with its placeholders substituted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Step {
    Key(String),
    Index(usize),
}

impl<'a> EvalContext<'a> {
    /// Bind an item to a request's maps.
    #[must_use]
    pub fn new(
        item: &'a Item,
        names: &'a ExpressionAttributeNames,
        values: &'a ExpressionAttributeValues,
    ) -> Self {
        Self {
            item,
            names,
            values,
        }
    }

    /// Evaluate a condition.
    pub fn evaluate(&self, expr: &Expr) -> Result<bool, ExpressionError> {
        match expr {
            Expr::Compare { left, op, right } => {
                let (Some(l), Some(r)) = (self.operand(left)?, self.operand(right)?) else {
                    return Ok(false);
                };
                Ok(compare(&l, &r, *op))
            }
            Expr::Between { value, low, high } => {
                let (Some(v), Some(lo), Some(hi)) =
                    (self.operand(value)?, self.operand(low)?, self.operand(high)?)
                else {
                    return Ok(false);
                };
                Ok(compare(&v, &lo, CompareOp::Ge) && compare(&v, &hi, CompareOp::Le))
            }
            Expr::In { value, list } => {
                let Some(v) = self.operand(value)? else {
                    return Ok(false);
                };
                for candidate in list {
                    if self
                        .operand(candidate)?
                        .is_some_and(|c| compare(&v, &c, CompareOp::Eq))
                    {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Expr::Logical { op, left, right } => match op {
                LogicalOp::And => Ok(self.evaluate(left)? && self.evaluate(right)?),
                LogicalOp::Or => Ok(self.evaluate(left)? || self.evaluate(right)?),
            },
            Expr::Not(inner) => Ok(!self.evaluate(inner)?),
            Expr::Function { name, args } => self.function(*name, args),
        }
    }

    fn function(&self, name: FunctionName, args: &[Operand]) -> Result<bool, ExpressionError> {
        let Some(Operand::Path(path)) = args.first() else {
            return Err(ExpressionError::InvalidOperand {
                operation: name.to_string(),
                message: "first argument must be a document path".to_owned(),
            });
        };
        let target = self.path(path)?;
        let argument = match args.get(1) {
            Some(operand) => self.operand(operand)?,
            None => None,
        };

        match name {
            FunctionName::AttributeExists => Ok(target.is_some()),
            FunctionName::AttributeNotExists => Ok(target.is_none()),
            FunctionName::AttributeType => match argument {
                Some(AttributeValue::S(expected)) => {
                    Ok(target.is_some_and(|v| v.type_descriptor() == expected))
                }
                _ => Err(ExpressionError::TypeMismatch {
                    message: "attribute_type expects a string type descriptor".to_owned(),
                }),
            },
            FunctionName::BeginsWith => Ok(match (target, &argument) {
                (Some(AttributeValue::S(s)), Some(AttributeValue::S(prefix))) => {
                    s.starts_with(prefix.as_str())
                }
                (Some(AttributeValue::B(b)), Some(AttributeValue::B(prefix))) => {
                    b.starts_with(prefix)
                }
                _ => false,
            }),
            FunctionName::Contains => Ok(match (target, &argument) {
                (Some(AttributeValue::S(s)), Some(AttributeValue::S(sub))) => {
                    s.contains(sub.as_str())
                }
                (Some(AttributeValue::Ss(set)), Some(AttributeValue::S(member)))
                | (Some(AttributeValue::Ns(set)), Some(AttributeValue::N(member))) => {
                    set.contains(member)
                }
                (Some(AttributeValue::Bs(set)), Some(AttributeValue::B(member))) => {
                    set.contains(member)
                }
                (Some(AttributeValue::L(list)), Some(member)) => {
                    list.iter().any(|e| compare(e, member, CompareOp::Eq))
                }
                _ => false,
            }),
        }
    }

    /// Resolve an operand. Missing paths resolve to `None`.
    pub fn operand(&self, operand: &Operand) -> Result<Option<AttributeValue>, ExpressionError> {
        match operand {
            Operand::Path(path) => Ok(self.path(path)?.cloned()),
            Operand::Value(name) => self
                .values
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| ExpressionError::UnresolvedValue { name: name.clone() }),
            Operand::Size(path) => Ok(self
                .path(path)?
                .and_then(size_of)
                .map(AttributeValue::number)),
        }
    }

    /// Walk a document path.
    pub fn path(&self, path: &AttributePath) -> Result<Option<&'a AttributeValue>, ExpressionError> {
        let steps = self.steps(path)?;
        Ok(lookup(self.item, &steps))
    }

    pub(crate) fn steps(&self, path: &AttributePath) -> Result<Vec<Step>, ExpressionError> {
        path.elements
            .iter()
            .map(|element| match element {
                PathElement::Attribute(name) => self.name(name).map(|n| Step::Key(n.to_owned())),
                PathElement::Index(i) => Ok(Step::Index(*i)),
            })
            .collect()
    }

    /// Substitute a `#name`; bare names pass through.
    pub fn name<'n>(&'n self, name: &'n str) -> Result<&'n str, ExpressionError> {
        if name.starts_with('#') {
            self.names
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| ExpressionError::UnresolvedName {
                    name: name.to_owned(),
                })
        } else {
            Ok(name)
        }
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

impl EvalContext<'_> {
    /// Apply an update, returning the new item. Right-hand sides of SET read
    /// the item as it was before the update.
    pub fn apply_update(&self, update: &UpdateExpr) -> Result<Item, ExpressionError> {
        let mut result = self.item.clone();

        for action in &update.set_actions {
            let value = self.set_value(&action.value)?;
            set_at(&mut result, &self.steps(&action.path)?, value)?;
        }

        // Removing list elements from the highest index down keeps the
        // indices of one expression referring to the original list.
        let mut removals = update
            .remove_paths
            .iter()
            .map(|p| self.steps(p))
            .collect::<Result<Vec<_>, _>>()?;
        removals.sort_by(|a, b| b.cmp(a));
        for steps in &removals {
            remove_at(&mut result, steps);
        }

        for action in &update.add_actions {
            self.add(&mut result, action)?;
        }
        for action in &update.delete_actions {
            self.delete(&mut result, action)?;
        }
        Ok(result)
    }

    fn set_value(&self, value: &SetValue) -> Result<AttributeValue, ExpressionError> {
        match value {
            SetValue::Operand(operand) => self.required(operand, "SET"),
            SetValue::Plus(a, b) => arithmetic(&self.set_value(a)?, &self.set_value(b)?, true),
            SetValue::Minus(a, b) => arithmetic(&self.set_value(a)?, &self.set_value(b)?, false),
            SetValue::IfNotExists(path, default) => match self.path(path)? {
                Some(existing) => Ok(existing.clone()),
                None => self.required(default, "if_not_exists"),
            },
            SetValue::ListAppend(a, b) => {
                match (self.required(a, "list_append")?, self.required(b, "list_append")?) {
                    (AttributeValue::L(mut first), AttributeValue::L(second)) => {
                        first.extend(second);
                        Ok(AttributeValue::L(first))
                    }
                    _ => Err(ExpressionError::TypeMismatch {
                        message: "list_append requires two lists".to_owned(),
                    }),
                }
            }
        }
    }

    fn required(&self, operand: &Operand, operation: &str) -> Result<AttributeValue, ExpressionError> {
        self.operand(operand)?
            .ok_or_else(|| ExpressionError::InvalidOperand {
                operation: operation.to_owned(),
                message: "The provided expression refers to an attribute that does not exist in the item"
                    .to_owned(),
            })
    }

    fn add(&self, item: &mut Item, action: &PathValue) -> Result<(), ExpressionError> {
        let delta = self.required(&action.value, "ADD")?;
        let steps = self.steps(&action.path)?;
        let merged = match (lookup(item, &steps), delta) {
            (None, delta @ (AttributeValue::N(_) | AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_))) => delta,
            (Some(existing @ AttributeValue::N(_)), delta @ AttributeValue::N(_)) => {
                arithmetic(existing, &delta, true)?
            }
            (Some(AttributeValue::Ss(set)), AttributeValue::Ss(members)) => {
                AttributeValue::Ss(union(set, members))
            }
            (Some(AttributeValue::Ns(set)), AttributeValue::Ns(members)) => {
                AttributeValue::Ns(union(set, members))
            }
            (Some(AttributeValue::Bs(set)), AttributeValue::Bs(members)) => {
                AttributeValue::Bs(union(set, members))
            }
            _ => {
                return Err(ExpressionError::TypeMismatch {
                    message: "ADD requires a number or a set of the stored type".to_owned(),
                });
            }
        };
        set_at(item, &steps, merged)
    }

    fn delete(&self, item: &mut Item, action: &PathValue) -> Result<(), ExpressionError> {
        let members = self.required(&action.value, "DELETE")?;
        let steps = self.steps(&action.path)?;
        let remaining = match (lookup(item, &steps), &members) {
            (None, _) => return Ok(()),
            (Some(AttributeValue::Ss(set)), AttributeValue::Ss(drop)) => {
                AttributeValue::Ss(difference(set, drop))
            }
            (Some(AttributeValue::Ns(set)), AttributeValue::Ns(drop)) => {
                AttributeValue::Ns(difference(set, drop))
            }
            (Some(AttributeValue::Bs(set)), AttributeValue::Bs(drop)) => {
                AttributeValue::Bs(difference(set, drop))
            }
            _ => {
                return Err(ExpressionError::TypeMismatch {
                    message: "DELETE requires a set of the stored type".to_owned(),
                });
            }
        };
        if size_of(&remaining) == Some(0) {
            remove_at(item, &steps);
            Ok(())
        } else {
            set_at(item, &steps, remaining)
        }
    }

    /// Keep only the projected paths. Nested paths keep the enclosing maps;
    /// list elements are collected in path order.
    pub fn apply_projection(&self, paths: &[AttributePath]) -> Result<Item, ExpressionError> {
        let mut projected = Item::new();
        for path in paths {
            let steps = self.steps(path)?;
            if let Some(value) = lookup(self.item, &steps) {
                project_into(&mut projected, &steps, value.clone());
            }
        }
        Ok(projected)
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub(crate) fn lookup<'i>(item: &'i Item, steps: &[Step]) -> Option<&'i AttributeValue> {
    let (Step::Key(first), rest) = steps.split_first()? else {
        return None;
    };
    let mut current = item.get(first)?;
    for step in rest {
        current = match (step, current) {
            (Step::Key(k), AttributeValue::M(map)) => map.get(k)?,
            (Step::Index(i), AttributeValue::L(list)) => list.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn invalid_path() -> ExpressionError {
    ExpressionError::InvalidOperand {
        operation: "update".to_owned(),
        message: "The document path provided in the update expression is invalid for update"
            .to_owned(),
    }
}

fn set_at(item: &mut Item, steps: &[Step], value: AttributeValue) -> Result<(), ExpressionError> {
    let Some((Step::Key(first), rest)) = steps.split_first() else {
        return Err(invalid_path());
    };
    if rest.is_empty() {
        item.insert(first.clone(), value);
        return Ok(());
    }
    let parent = item.get_mut(first).ok_or_else(invalid_path)?;
    set_in(parent, rest, value)
}

fn set_in(
    current: &mut AttributeValue,
    steps: &[Step],
    value: AttributeValue,
) -> Result<(), ExpressionError> {
    let Some((step, rest)) = steps.split_first() else {
        *current = value;
        return Ok(());
    };
    match (step, current) {
        (Step::Key(k), AttributeValue::M(map)) if rest.is_empty() => {
            map.insert(k.clone(), value);
            Ok(())
        }
        (Step::Key(k), AttributeValue::M(map)) => {
            set_in(map.get_mut(k).ok_or_else(invalid_path)?, rest, value)
        }
        (Step::Index(i), AttributeValue::L(list)) if rest.is_empty() => {
            // Setting past the end appends.
            if let Some(slot) = list.get_mut(*i) {
                *slot = value;
            } else {
                list.push(value);
            }
            Ok(())
        }
        (Step::Index(i), AttributeValue::L(list)) => {
            set_in(list.get_mut(*i).ok_or_else(invalid_path)?, rest, value)
        }
        _ => Err(invalid_path()),
    }
}

fn remove_at(item: &mut Item, steps: &[Step]) {
    let Some((Step::Key(first), rest)) = steps.split_first() else {
        return;
    };
    if rest.is_empty() {
        item.remove(first);
    } else if let Some(parent) = item.get_mut(first) {
        remove_in(parent, rest);
    }
}

fn remove_in(current: &mut AttributeValue, steps: &[Step]) {
    let Some((step, rest)) = steps.split_first() else {
        return;
    };
    match (step, current) {
        (Step::Key(k), AttributeValue::M(map)) if rest.is_empty() => {
            map.remove(k);
        }
        (Step::Index(i), AttributeValue::L(list)) if rest.is_empty() => {
            if *i < list.len() {
                list.remove(*i);
            }
        }
        (Step::Key(k), AttributeValue::M(map)) => {
            if let Some(next) = map.get_mut(k) {
                remove_in(next, rest);
            }
        }
        (Step::Index(i), AttributeValue::L(list)) => {
            if let Some(next) = list.get_mut(*i) {
                remove_in(next, rest);
            }
        }
        _ => {}
    }
}

fn project_into(target: &mut Item, steps: &[Step], value: AttributeValue) {
    let Some((Step::Key(first), rest)) = steps.split_first() else {
        return;
    };
    if rest.is_empty() {
        target.insert(first.clone(), value);
        return;
    }
    let template = match rest.first() {
        Some(Step::Index(_)) => AttributeValue::L(Vec::new()),
        _ => AttributeValue::M(BTreeMap::new()),
    };
    let slot = target.entry(first.clone()).or_insert(template);
    project_in(slot, rest, value);
}

fn project_in(slot: &mut AttributeValue, steps: &[Step], value: AttributeValue) {
    let Some((step, rest)) = steps.split_first() else {
        *slot = value;
        return;
    };
    let template = match rest.first() {
        Some(Step::Index(_)) => AttributeValue::L(Vec::new()),
        _ => AttributeValue::M(BTreeMap::new()),
    };
    match (step, slot) {
        (Step::Key(k), AttributeValue::M(map)) => {
            let next = map.entry(k.clone()).or_insert(template);
            project_in(next, rest, value);
        }
        (Step::Index(_), AttributeValue::L(list)) => {
            if rest.is_empty() {
                list.push(value);
            } else {
                list.push(template);
                if let Some(next) = list.last_mut() {
                    project_in(next, rest, value);
                }
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Value helpers
// ---------------------------------------------------------------------------

/// Compare two values. Mismatched types are only ever unequal.
pub(crate) fn compare(left: &AttributeValue, right: &AttributeValue, op: CompareOp) -> bool {
    let ordering = match (left, right) {
        (AttributeValue::S(a), AttributeValue::S(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (AttributeValue::N(a), AttributeValue::N(b)) => compare_numbers(a, b),
        (AttributeValue::B(a), AttributeValue::B(b)) => Some(a.as_ref().cmp(b.as_ref())),
        _ => None,
    };
    match ordering {
        Some(ord) => match op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        },
        None => match op {
            CompareOp::Eq => structurally_equal(left, right),
            CompareOp::Ne => !structurally_equal(left, right),
            _ => false,
        },
    }
}

/// Numeric ordering of two number strings. Integers compare exactly.
pub(crate) fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
        return Some(x.cmp(&y));
    }
    a.parse::<f64>().ok()?.partial_cmp(&b.parse::<f64>().ok()?)
}

fn structurally_equal(left: &AttributeValue, right: &AttributeValue) -> bool {
    match (left, right) {
        (AttributeValue::Ss(a), AttributeValue::Ss(b))
        | (AttributeValue::Ns(a), AttributeValue::Ns(b)) => {
            a.len() == b.len() && a.iter().all(|m| b.contains(m))
        }
        (AttributeValue::Bs(a), AttributeValue::Bs(b)) => {
            a.len() == b.len() && a.iter().all(|m| b.contains(m))
        }
        (AttributeValue::L(a), AttributeValue::L(b)) => {
            a.len() == b.len()
                && a.iter()
                    .zip(b)
                    .all(|(x, y)| compare(x, y, CompareOp::Eq))
        }
        (AttributeValue::M(a), AttributeValue::M(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, x)| {
                    b.get(k)
                        .is_some_and(|y| compare(x, y, CompareOp::Eq))
                })
        }
        _ => left == right,
    }
}

fn arithmetic(
    a: &AttributeValue,
    b: &AttributeValue,
    add: bool,
) -> Result<AttributeValue, ExpressionError> {
    let (AttributeValue::N(x), AttributeValue::N(y)) = (a, b) else {
        return Err(ExpressionError::TypeMismatch {
            message: "An operand in the update expression has an incorrect data type".to_owned(),
        });
    };
    if let (Ok(x), Ok(y)) = (x.parse::<i128>(), y.parse::<i128>()) {
        let result = if add { x.checked_add(y) } else { x.checked_sub(y) };
        if let Some(n) = result {
            return Ok(AttributeValue::number(n));
        }
    }
    let (Ok(x), Ok(y)) = (x.parse::<f64>(), y.parse::<f64>()) else {
        return Err(ExpressionError::TypeMismatch {
            message: format!("'{x}' or '{y}' is not a number"),
        });
    };
    Ok(AttributeValue::number(if add { x + y } else { x - y }))
}

fn size_of(value: &AttributeValue) -> Option<usize> {
    match value {
        AttributeValue::S(s) => Some(s.len()),
        AttributeValue::B(b) => Some(b.len()),
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => Some(v.len()),
        AttributeValue::Bs(v) => Some(v.len()),
        AttributeValue::L(v) => Some(v.len()),
        AttributeValue::M(m) => Some(m.len()),
        AttributeValue::N(_) | AttributeValue::Bool(_) | AttributeValue::Null(_) => None,
    }
}

fn union<T: Clone + PartialEq>(set: &[T], members: Vec<T>) -> Vec<T> {
    let mut merged = set.to_vec();
    for member in members {
        if !merged.contains(&member) {
            merged.push(member);
        }
    }
    merged
}

fn difference<T: Clone + PartialEq>(set: &[T], drop: &[T]) -> Vec<T> {
    set.iter().filter(|m| !drop.contains(m)).cloned().collect()
}
