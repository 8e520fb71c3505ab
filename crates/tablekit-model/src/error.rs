//! DynamoDB protocol error types.
//!
//! DynamoDB errors use JSON format with a `__type` field containing the
//! fully-qualified error type name, e.g.
//! `com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::CancellationReason;

/// Well-known DynamoDB error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[non_exhaustive]
pub enum ServiceErrorCode {
    /// Table not found.
    ResourceNotFoundException,
    /// Table is being created, updated or deleted.
    ResourceInUseException,
    /// Condition check failed.
    ConditionalCheckFailedException,
    /// Transaction canceled.
    TransactionCanceledException,
    /// Transaction conflict.
    TransactionConflictException,
    /// Transaction in progress.
    TransactionInProgressException,
    /// Idempotent parameter mismatch.
    IdempotentParameterMismatchException,
    /// Item collection size limit exceeded.
    ItemCollectionSizeLimitExceededException,
    /// Provisioned throughput exceeded.
    ProvisionedThroughputExceededException,
    /// Request rate throttled.
    ThrottlingException,
    /// Request limit exceeded.
    RequestLimitExceeded,
    /// Validation error.
    #[default]
    ValidationException,
    /// Serialization error.
    SerializationException,
    /// Internal server error.
    InternalServerError,
    /// Service unavailable.
    ServiceUnavailable,
    /// Access denied.
    AccessDeniedException,
    /// Unknown client or operation.
    UnrecognizedClientException,
    /// The request never produced a service response (connect, timeout or
    /// undecodable body).
    RequestFailure,
    /// A code this client does not know.
    Unknown,
}

impl ServiceErrorCode {
    /// Returns the short error code string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceNotFoundException => "ResourceNotFoundException",
            Self::ResourceInUseException => "ResourceInUseException",
            Self::ConditionalCheckFailedException => "ConditionalCheckFailedException",
            Self::TransactionCanceledException => "TransactionCanceledException",
            Self::TransactionConflictException => "TransactionConflictException",
            Self::TransactionInProgressException => "TransactionInProgressException",
            Self::IdempotentParameterMismatchException => "IdempotentParameterMismatchException",
            Self::ItemCollectionSizeLimitExceededException => {
                "ItemCollectionSizeLimitExceededException"
            }
            Self::ProvisionedThroughputExceededException => {
                "ProvisionedThroughputExceededException"
            }
            Self::ThrottlingException => "ThrottlingException",
            Self::RequestLimitExceeded => "RequestLimitExceeded",
            Self::ValidationException => "ValidationException",
            Self::SerializationException => "SerializationException",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::AccessDeniedException => "AccessDeniedException",
            Self::UnrecognizedClientException => "UnrecognizedClientException",
            Self::RequestFailure => "RequestFailure",
            Self::Unknown => "Unknown",
        }
    }

    /// Parse a short code or a fully-qualified `__type` string.
    ///
    /// Everything up to the last `#` is ignored, so both
    /// `com.amazon.coral.validate#ValidationException` and
    /// `ValidationException` resolve to the same code.
    #[must_use]
    pub fn from_type(error_type: &str) -> Self {
        let short = error_type.rsplit('#').next().unwrap_or(error_type);
        match short {
            "ResourceNotFoundException" => Self::ResourceNotFoundException,
            "ResourceInUseException" => Self::ResourceInUseException,
            "ConditionalCheckFailedException" => Self::ConditionalCheckFailedException,
            "TransactionCanceledException" => Self::TransactionCanceledException,
            "TransactionConflictException" => Self::TransactionConflictException,
            "TransactionInProgressException" => Self::TransactionInProgressException,
            "IdempotentParameterMismatchException" => Self::IdempotentParameterMismatchException,
            "ItemCollectionSizeLimitExceededException" => {
                Self::ItemCollectionSizeLimitExceededException
            }
            "ProvisionedThroughputExceededException" => {
                Self::ProvisionedThroughputExceededException
            }
            "ThrottlingException" => Self::ThrottlingException,
            "RequestLimitExceeded" => Self::RequestLimitExceeded,
            "ValidationException" => Self::ValidationException,
            "SerializationException" => Self::SerializationException,
            "InternalServerError" | "InternalFailure" => Self::InternalServerError,
            "ServiceUnavailable" | "ServiceUnavailableException" => Self::ServiceUnavailable,
            "AccessDeniedException" => Self::AccessDeniedException,
            "UnrecognizedClientException" => Self::UnrecognizedClientException,
            _ => Self::Unknown,
        }
    }

    /// Returns the default HTTP status code for this error.
    #[must_use]
    pub fn default_status_code(&self) -> http::StatusCode {
        match self {
            Self::InternalServerError | Self::Unknown => http::StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable | Self::RequestFailure => {
                http::StatusCode::SERVICE_UNAVAILABLE
            }
            _ => http::StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by the service (or by a transport standing in for it).
#[derive(Debug)]
pub struct ServiceError {
    /// The error code.
    pub code: ServiceErrorCode,
    /// A human-readable error message.
    pub message: String,
    /// The HTTP status code.
    pub status_code: http::StatusCode,
    /// Per-operation reasons, present on `TransactionCanceledException`.
    pub cancellation_reasons: Vec<CancellationReason>,
    /// The underlying source error, if any.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceError({}): {}", self.code, self.message)
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl ServiceError {
    /// Create a new `ServiceError` from an error code.
    #[must_use]
    pub fn new(code: ServiceErrorCode) -> Self {
        Self::with_message(code, code.as_str())
    }

    /// Create a new `ServiceError` with a custom message.
    #[must_use]
    pub fn with_message(code: ServiceErrorCode, message: impl Into<String>) -> Self {
        Self {
            status_code: code.default_status_code(),
            message: message.into(),
            code,
            cancellation_reasons: Vec::new(),
            source: None,
        }
    }

    /// Set the source error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach transaction cancellation reasons.
    #[must_use]
    pub fn with_cancellation_reasons(mut self, reasons: Vec<CancellationReason>) -> Self {
        self.cancellation_reasons = reasons;
        self
    }

    /// Parse an error response body.
    ///
    /// Bodies that are not valid error JSON still produce an error, coded from
    /// the HTTP status, so a broken proxy never surfaces as a success.
    #[must_use]
    pub fn from_body(status: http::StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => {
                let code = ServiceErrorCode::from_type(&parsed.error_type);
                let message = parsed
                    .message
                    .or(parsed.message_upper)
                    .unwrap_or_else(|| code.as_str().to_owned());
                Self {
                    code,
                    message,
                    status_code: status,
                    cancellation_reasons: parsed.cancellation_reasons,
                    source: None,
                }
            }
            Err(e) => {
                let code = if status.is_server_error() {
                    ServiceErrorCode::InternalServerError
                } else {
                    ServiceErrorCode::Unknown
                };
                let mut err = Self::with_message(
                    code,
                    format!("unparseable error response (HTTP {status})"),
                )
                .with_source(e);
                err.status_code = status;
                err
            }
        }
    }

    // -- Convenience constructors --

    /// Table or resource not found.
    #[must_use]
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::with_message(ServiceErrorCode::ResourceNotFoundException, message)
    }

    /// Condition expression evaluated to false.
    #[must_use]
    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::with_message(ServiceErrorCode::ConditionalCheckFailedException, message)
    }

    /// Validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(ServiceErrorCode::ValidationException, message)
    }

    /// Throughput exceeded.
    #[must_use]
    pub fn throughput_exceeded(message: impl Into<String>) -> Self {
        Self::with_message(ServiceErrorCode::ProvisionedThroughputExceededException, message)
    }

    /// Internal server error.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::with_message(ServiceErrorCode::InternalServerError, message)
    }

    /// Transaction canceled with the given per-operation reasons.
    #[must_use]
    pub fn transaction_canceled(reasons: Vec<CancellationReason>) -> Self {
        let codes: Vec<&str> = reasons
            .iter()
            .map(|r| r.code.as_deref().unwrap_or("None"))
            .collect();
        Self::with_message(
            ServiceErrorCode::TransactionCanceledException,
            format!(
                "Transaction cancelled, please refer cancellation reasons for specific reasons [{}]",
                codes.join(", ")
            ),
        )
        .with_cancellation_reasons(reasons)
    }
}

/// JSON error body as sent by the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Fully-qualified error type.
    #[serde(rename = "__type", default)]
    pub error_type: String,
    /// Lower-case message key (JSON 1.0 protocol).
    #[serde(rename = "message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Upper-case message key, used by some error types.
    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message_upper: Option<String>,
    /// Cancellation reasons for `TransactionCanceledException`.
    #[serde(
        rename = "CancellationReasons",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub cancellation_reasons: Vec<CancellationReason>,
}

/// Create a `ServiceError` from an error code.
///
/// # Examples
///
/// ```
/// use tablekit_model::service_error;
/// use tablekit_model::error::ServiceErrorCode;
///
/// let err = service_error!(ValidationException);
/// assert_eq!(err.code, ServiceErrorCode::ValidationException);
///
/// let err = service_error!(ResourceNotFoundException, "Table not found");
/// assert_eq!(err.message, "Table not found");
/// ```
#[macro_export]
macro_rules! service_error {
    ($code:ident) => {
        $crate::error::ServiceError::new($crate::error::ServiceErrorCode::$code)
    };
    ($code:ident, $msg:expr) => {
        $crate::error::ServiceError::with_message($crate::error::ServiceErrorCode::$code, $msg)
    };
}
