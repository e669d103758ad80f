//! Webhook error types.
//!
//! Status codes drive the provider's redelivery: 2xx acknowledges, 4xx stops
//! retries for malformed deliveries, 409 and 5xx ask for redelivery.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors that occur during webhook processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// Webhook signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Webhook timestamp is older than the tolerance window.
    #[error("Timestamp out of range")]
    TimestampOutOfRange,

    /// Webhook timestamp is in the future beyond clock skew tolerance.
    #[error("Invalid timestamp")]
    InvalidTimestamp,

    /// Failed to parse webhook payload or signature header.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Required metadata key missing from the subscription object.
    #[error("Missing metadata: {0}")]
    MissingMetadata(&'static str),

    /// Required field missing from the subscription object.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Metadata names a plan that is not in the catalog.
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// Applying the event would give the user a second active subscription.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),
}

impl WebhookError {
    /// Returns true for signature and timestamp failures.
    pub fn is_authenticity_failure(&self) -> bool {
        matches!(
            self,
            WebhookError::InvalidSignature
                | WebhookError::TimestampOutOfRange
                | WebhookError::InvalidTimestamp
        )
    }

    /// Returns true if the provider should redeliver this webhook.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WebhookError::Database(_) | WebhookError::Conflict(_))
    }

    /// Maps the error to an HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::InvalidSignature
            | WebhookError::TimestampOutOfRange
            | WebhookError::InvalidTimestamp => StatusCode::UNAUTHORIZED,

            WebhookError::ParseError(_)
            | WebhookError::MissingMetadata(_)
            | WebhookError::MissingField(_)
            | WebhookError::UnknownPlan(_) => StatusCode::BAD_REQUEST,

            WebhookError::Conflict(_) => StatusCode::CONFLICT,

            WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
