//! Mapping of store-internal errors onto service errors.

use tablekit_model::ServiceError;

use crate::expression::ExpressionError;
use crate::storage::StorageError;

/// Convert a storage error into a validation error.
///
/// Takes `e` by value because this is used as a closure argument to `.map_err()`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn storage_error(e: StorageError) -> ServiceError {
    ServiceError::validation(e.to_string())
}

/// Convert an expression error into a validation error.
///
/// Takes `e` by value because this is used as a closure argument to `.map_err()`.
#[must_use]
#[allow(clippy::needless_pass_by_value)]
pub fn expression_error(e: ExpressionError) -> ServiceError {
    ServiceError::validation(e.to_string())
}
