//! DynamoDB expression parsing and evaluation.

pub mod ast;
pub mod evaluator;
pub mod parser;

pub use ast::{AttributePath, Expr, Placeholders, UpdateExpr};
pub use evaluator::EvalContext;
pub use parser::{ExpressionError, parse_condition, parse_projection, parse_update};

use tablekit_model::types::{ExpressionAttributeNames, ExpressionAttributeValues};

/// Reject placeholders that are supplied but never referenced, and
/// references with no supplied placeholder.
pub fn check_placeholders(
    used: &Placeholders,
    names: &ExpressionAttributeNames,
    values: &ExpressionAttributeValues,
) -> Result<(), ExpressionError> {
    if let Some(name) = used.names.iter().find(|n| !names.contains_key(*n)) {
        return Err(ExpressionError::UnresolvedName { name: name.clone() });
    }
    if let Some(name) = used.values.iter().find(|v| !values.contains_key(*v)) {
        return Err(ExpressionError::UnresolvedValue { name: name.clone() });
    }
    let unused = names
        .keys()
        .filter(|n| !used.names.contains(*n))
        .chain(values.keys().filter(|v| !used.values.contains(*v)))
        .cloned()
        .collect::<Vec<_>>();
    if unused.is_empty() {
        Ok(())
    } else {
        Err(ExpressionError::InvalidOperand {
            operation: "request".to_owned(),
            message: format!(
                "Value provided in ExpressionAttributeNames or ExpressionAttributeValues unused in expressions: keys: {{{}}}",
                unused.join(", ")
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablekit_model::AttributeValue;

    #[test]
    fn test_should_accept_exact_placeholder_sets() {
        let mut used = Placeholders::default();
        used.visit_expr(&parse_condition("#n1 = :v1").unwrap());
        let names = ExpressionAttributeNames::from([("#n1".to_owned(), "status".to_owned())]);
        let values = ExpressionAttributeValues::from([(":v1".to_owned(), AttributeValue::S("x".to_owned()))]);
        assert!(check_placeholders(&used, &names, &values).is_ok());
    }

    #[test]
    fn test_should_reject_unused_and_missing_placeholders() {
        let mut used = Placeholders::default();
        used.visit_expr(&parse_condition("#n1 = :v1").unwrap());
        let names = ExpressionAttributeNames::from([
            ("#n1".to_owned(), "status".to_owned()),
            ("#n2".to_owned(), "extra".to_owned()),
        ]);
        let values = ExpressionAttributeValues::from([(":v1".to_owned(), AttributeValue::S("x".to_owned()))]);
        let err = check_placeholders(&used, &names, &values).unwrap_err();
        assert!(err.to_string().contains("#n2"));

        let err = check_placeholders(&used, &ExpressionAttributeNames::new(), &values).unwrap_err();
        assert!(matches!(err, ExpressionError::UnresolvedName { .. }));
    }
}
