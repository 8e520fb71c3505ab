//! Error taxonomy for tablekit operations.
//!
//! Every failure a caller observes is an [`Error`]. Protocol errors coming back
//! from a [`Transport`](crate::transport::Transport) are mapped exactly once, at
//! the executor boundary, by [`translate`]; no other code inspects protocol
//! error codes.

use tablekit_model::types::CancellationReason;
use tablekit_model::{Key, ServiceError, ServiceErrorCode};

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable, comparable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A condition expression evaluated to false.
    ConditionFailed,
    /// A read matched nothing.
    ItemNotFound,
    /// The request was rejected before or by the service as malformed.
    Validation,
    /// The request was throttled (or hit a transient transaction conflict).
    Throttled,
    /// An encrypted field was written without a configured encryptor.
    EncryptionNotConfigured,
    /// A transaction was canceled.
    TransactionCanceled,
    /// A batch read exhausted its retries with keys still unprocessed.
    BatchIncomplete,
    /// Some batch writes failed after retries.
    Batch,
    /// The table does not exist.
    ResourceNotFound,
    /// The caller's cancellation token fired.
    Canceled,
    /// The request never produced a service response.
    Transport,
    /// A value could not be encoded or decoded.
    Codec,
    /// Any other service error.
    Service,
}

/// One slot of a canceled transaction, in operation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReason {
    /// Zero-based position of the operation in the transaction.
    pub index: usize,
    /// The action of the operation (`Put`, `Update`, `Delete`, `ConditionCheck`).
    pub operation: &'static str,
    /// Reason code reported by the service; `"None"` for operations that did
    /// not fail.
    pub code: String,
    /// Reason message, if any.
    pub message: Option<String>,
}

/// Reason codes that mark a cancellation as safe to retry.
pub const TRANSIENT_REASON_CODES: &[&str] = &[
    "TransactionConflict",
    "ProvisionedThroughputExceeded",
    "ThrottlingError",
    "RequestLimitExceeded",
    "InternalServerError",
];

impl TransactionReason {
    /// Returns `true` if this operation caused the cancellation.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.code != "None"
    }

    /// Returns `true` if this reason is one the service may not repeat.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        TRANSIENT_REASON_CODES.contains(&self.code.as_str())
    }
}

/// Writes that still failed after retries and the one-by-one flush.
#[derive(Debug, thiserror::Error)]
#[error("{} batch write(s) failed after retries", .failed.len())]
pub struct BatchError {
    /// `(index into the caller's input, cause)` for every failed write.
    pub failed: Vec<(usize, Error)>,
}

/// The error type of every tablekit operation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A condition expression evaluated to false.
    #[error("condition check failed: {message}")]
    ConditionFailed {
        /// Service message.
        message: String,
    },

    /// A read that must return a record matched nothing.
    #[error("item not found")]
    ItemNotFound,

    /// A malformed request, detected locally or by the service.
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// Throttling, surfaced once the retry policy is exhausted.
    #[error("request throttled ({code}): {message}")]
    Throttled {
        /// The protocol code that caused the throttle.
        code: ServiceErrorCode,
        /// Service message.
        message: String,
    },

    /// An encrypted field was written with no encryptor on the codec.
    #[error("field `{field}` is encrypted but no encryptor is configured")]
    EncryptionNotConfigured {
        /// Attribute name of the field.
        field: String,
    },

    /// The transaction was canceled; `reasons` has one entry per operation.
    #[error("transaction canceled, failed operations {:?}", failed_indices(.reasons))]
    TransactionCanceled {
        /// Per-operation reasons, in operation order.
        reasons: Vec<TransactionReason>,
    },

    /// A batch read exhausted its retries with keys still unprocessed.
    #[error("batch get exhausted retries with {} unprocessed keys", .unprocessed.len())]
    BatchIncomplete {
        /// The keys that were never read.
        unprocessed: Vec<Key>,
    },

    /// Some batch writes failed.
    #[error(transparent)]
    Batch(#[from] BatchError),

    /// The table does not exist.
    #[error("resource not found: {message}")]
    ResourceNotFound {
        /// Service message.
        message: String,
    },

    /// The caller's cancellation token fired.
    #[error("operation canceled")]
    Canceled,

    /// The request never produced a service response.
    #[error("transport error: {message}")]
    Transport {
        /// What happened.
        message: String,
        /// Underlying cause.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A value could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// What was wrong.
        message: String,
    },

    /// Any other service error.
    #[error("service error ({code}): {message}")]
    Service {
        /// Protocol code.
        code: ServiceErrorCode,
        /// Service message.
        message: String,
    },
}

fn failed_indices(reasons: &[TransactionReason]) -> Vec<usize> {
    reasons
        .iter()
        .filter(|r| r.is_failure())
        .map(|r| r.index)
        .collect()
}

impl Error {
    /// Shorthand for [`Error::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::Codec`].
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// The stable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConditionFailed { .. } => ErrorKind::ConditionFailed,
            Self::ItemNotFound => ErrorKind::ItemNotFound,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Throttled { .. } => ErrorKind::Throttled,
            Self::EncryptionNotConfigured { .. } => ErrorKind::EncryptionNotConfigured,
            Self::TransactionCanceled { .. } => ErrorKind::TransactionCanceled,
            Self::BatchIncomplete { .. } => ErrorKind::BatchIncomplete,
            Self::Batch(_) => ErrorKind::Batch,
            Self::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            Self::Canceled => ErrorKind::Canceled,
            Self::Transport { .. } => ErrorKind::Transport,
            Self::Codec { .. } => ErrorKind::Codec,
            Self::Service { .. } => ErrorKind::Service,
        }
    }

    /// Returns `true` for errors a retry policy may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Throttled { .. } => true,
            Self::Service { code, .. } => matches!(
                code,
                ServiceErrorCode::InternalServerError | ServiceErrorCode::ServiceUnavailable
            ),
            _ => false,
        }
    }

    /// Returns `true` for a failed condition, including a transaction canceled
    /// because one of its conditions failed.
    #[must_use]
    pub fn is_condition_failed(&self) -> bool {
        match self {
            Self::ConditionFailed { .. } => true,
            Self::TransactionCanceled { reasons } => {
                reasons.iter().any(|r| r.code == "ConditionalCheckFailed")
            }
            _ => false,
        }
    }

    /// Indices of the operations that caused a transaction cancellation.
    /// Empty for every other error.
    #[must_use]
    pub fn failed(&self) -> Vec<usize> {
        match self {
            Self::TransactionCanceled { reasons } => failed_indices(reasons),
            _ => Vec::new(),
        }
    }

    /// A copy of this error for reporting against several inputs. A
    /// transport error's source is dropped; its message is kept.
    pub(crate) fn replicate(&self) -> Self {
        match self {
            Self::ConditionFailed { message } => Self::ConditionFailed {
                message: message.clone(),
            },
            Self::ItemNotFound => Self::ItemNotFound,
            Self::Validation { message } => Self::validation(message.clone()),
            Self::Throttled { code, message } => Self::Throttled {
                code: *code,
                message: message.clone(),
            },
            Self::EncryptionNotConfigured { field } => Self::EncryptionNotConfigured {
                field: field.clone(),
            },
            Self::TransactionCanceled { reasons } => Self::TransactionCanceled {
                reasons: reasons.clone(),
            },
            Self::BatchIncomplete { unprocessed } => Self::BatchIncomplete {
                unprocessed: unprocessed.clone(),
            },
            Self::Batch(batch) => Self::Batch(BatchError {
                failed: batch
                    .failed
                    .iter()
                    .map(|(index, e)| (*index, e.replicate()))
                    .collect(),
            }),
            Self::ResourceNotFound { message } => Self::ResourceNotFound {
                message: message.clone(),
            },
            Self::Canceled => Self::Canceled,
            Self::Transport { message, .. } => Self::Transport {
                message: message.clone(),
                source: None,
            },
            Self::Codec { message } => Self::codec(message.clone()),
            Self::Service { code, message } => Self::Service {
                code: *code,
                message: message.clone(),
            },
        }
    }

    /// Returns `true` if this is a cancellation in which every failed reason
    /// is transient.
    #[must_use]
    pub fn is_transient_cancellation(&self) -> bool {
        match self {
            Self::TransactionCanceled { reasons } => {
                let mut failed = reasons.iter().filter(|r| r.is_failure()).peekable();
                failed.peek().is_some() && failed.all(TransactionReason::is_transient)
            }
            _ => false,
        }
    }
}

/// Protocol code to error kind. Codes absent from the table are
/// [`ErrorKind::Service`].
const CODE_TABLE: &[(ServiceErrorCode, ErrorKind)] = &[
    (
        ServiceErrorCode::ConditionalCheckFailedException,
        ErrorKind::ConditionFailed,
    ),
    (
        ServiceErrorCode::ProvisionedThroughputExceededException,
        ErrorKind::Throttled,
    ),
    (ServiceErrorCode::ThrottlingException, ErrorKind::Throttled),
    (ServiceErrorCode::RequestLimitExceeded, ErrorKind::Throttled),
    (
        ServiceErrorCode::TransactionConflictException,
        ErrorKind::Throttled,
    ),
    (ServiceErrorCode::ValidationException, ErrorKind::Validation),
    (ServiceErrorCode::SerializationException, ErrorKind::Validation),
    (
        ServiceErrorCode::ItemCollectionSizeLimitExceededException,
        ErrorKind::Validation,
    ),
    (
        ServiceErrorCode::IdempotentParameterMismatchException,
        ErrorKind::Validation,
    ),
    (
        ServiceErrorCode::ResourceNotFoundException,
        ErrorKind::ResourceNotFound,
    ),
    (
        ServiceErrorCode::TransactionCanceledException,
        ErrorKind::TransactionCanceled,
    ),
    (ServiceErrorCode::RequestFailure, ErrorKind::Transport),
];

/// Look up the kind a protocol code translates to.
#[must_use]
pub fn kind_of(code: ServiceErrorCode) -> ErrorKind {
    CODE_TABLE
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(ErrorKind::Service, |(_, kind)| *kind)
}

/// Translate a protocol error into an [`Error`].
#[must_use]
pub fn translate(err: ServiceError) -> Error {
    translate_with_operations(err, &[])
}

/// Translate a protocol error, naming transaction operations by `operations`
/// (one action name per operation, in order).
#[must_use]
pub fn translate_with_operations(err: ServiceError, operations: &[&'static str]) -> Error {
    let ServiceError {
        code,
        message,
        cancellation_reasons,
        source,
        ..
    } = err;
    match kind_of(code) {
        ErrorKind::ConditionFailed => Error::ConditionFailed { message },
        ErrorKind::Throttled => Error::Throttled { code, message },
        ErrorKind::Validation => Error::Validation { message },
        ErrorKind::ResourceNotFound => Error::ResourceNotFound { message },
        ErrorKind::TransactionCanceled => Error::TransactionCanceled {
            reasons: decompose(cancellation_reasons, operations),
        },
        ErrorKind::Transport => Error::Transport { message, source },
        _ => Error::Service { code, message },
    }
}

fn decompose(
    reasons: Vec<CancellationReason>,
    operations: &[&'static str],
) -> Vec<TransactionReason> {
    reasons
        .into_iter()
        .enumerate()
        .map(|(index, reason)| TransactionReason {
            index,
            operation: operations.get(index).copied().unwrap_or("Unknown"),
            code: reason.code.unwrap_or_else(|| "None".to_owned()),
            message: reason.message,
        })
        .collect()
}
