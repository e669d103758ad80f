//! Subscription-specific error types.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | PlanNotFound | 404 |
//! | SubscriptionNotFound | 404 |
//! | ValidationFailed | 400 |
//! | Gateway (rejected) | 400 |
//! | Gateway (unavailable) | 502 |
//! | Gateway (outcome unknown) | 504 |
//! | RateLimited | 429 |
//! | Conflict | 409 |
//! | Infrastructure | 500 |

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, SubscriptionId, UserId, ValidationError,
};

/// How a payment provider call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayFailure {
    /// Provider refused the request; retrying the same request will not help.
    Rejected,
    /// Provider could not be reached or answered with a server error.
    Unavailable,
    /// The request may or may not have been applied at the provider.
    OutcomeUnknown,
}

/// Subscription lifecycle errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// Requested plan is not in the catalog.
    PlanNotFound(PlanId),

    /// No subscription with this id belongs to the caller.
    SubscriptionNotFound(SubscriptionId),

    /// Input was malformed or the request makes no sense in the current state.
    ValidationFailed { field: String, message: String },

    /// Payment provider failed or rejected the call.
    Gateway {
        failure: GatewayFailure,
        provider_code: Option<String>,
        message: String,
    },

    /// Payment provider throttled the call. The caller may retry.
    RateLimited { message: String },

    /// The write would leave the user with two active subscriptions, or the
    /// active row changed underneath this request.
    Conflict { user_id: UserId, message: String },

    /// Ledger or other infrastructure failure.
    Infrastructure(String),
}

impl SubscriptionError {
    pub fn plan_not_found(plan_id: PlanId) -> Self {
        SubscriptionError::PlanNotFound(plan_id)
    }

    pub fn subscription_not_found(id: SubscriptionId) -> Self {
        SubscriptionError::SubscriptionNotFound(id)
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        SubscriptionError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn gateway(failure: GatewayFailure, message: impl Into<String>) -> Self {
        SubscriptionError::Gateway {
            failure,
            provider_code: None,
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        SubscriptionError::RateLimited {
            message: message.into(),
        }
    }

    pub fn conflict(user_id: UserId, message: impl Into<String>) -> Self {
        SubscriptionError::Conflict {
            user_id,
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        SubscriptionError::Infrastructure(message.into())
    }

    /// Returns the error code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            SubscriptionError::PlanNotFound(_) => ErrorCode::PlanNotFound,
            SubscriptionError::SubscriptionNotFound(_) => ErrorCode::SubscriptionNotFound,
            SubscriptionError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            SubscriptionError::Gateway {
                failure: GatewayFailure::OutcomeUnknown,
                ..
            } => ErrorCode::GatewayOutcomeUnknown,
            SubscriptionError::Gateway { .. } => ErrorCode::GatewayError,
            SubscriptionError::RateLimited { .. } => ErrorCode::RateLimited,
            SubscriptionError::Conflict { .. } => ErrorCode::ActiveSubscriptionConflict,
            SubscriptionError::Infrastructure(_) => ErrorCode::DatabaseError,
        }
    }

    /// Returns a user-friendly error message.
    pub fn message(&self) -> String {
        match self {
            SubscriptionError::PlanNotFound(id) => format!("Plan not found: {}", id),
            SubscriptionError::SubscriptionNotFound(id) => {
                format!("Subscription not found: {}", id)
            }
            SubscriptionError::ValidationFailed { field, message } => {
                format!("Validation failed for '{}': {}", field, message)
            }
            SubscriptionError::Gateway {
                failure: GatewayFailure::OutcomeUnknown,
                message,
                ..
            } => format!(
                "Payment provider did not confirm the request, its outcome is unknown: {}",
                message
            ),
            SubscriptionError::Gateway { message, .. } => {
                format!("Payment provider error: {}", message)
            }
            SubscriptionError::RateLimited { message } => {
                format!("Payment provider is throttling requests, retry later: {}", message)
            }
            SubscriptionError::Conflict { user_id, message } => {
                format!("Subscription conflict for user {}: {}", user_id, message)
            }
            SubscriptionError::Infrastructure(msg) => format!("Error: {}", msg),
        }
    }

    /// Returns true if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubscriptionError::RateLimited { .. }
                | SubscriptionError::Conflict { .. }
                | SubscriptionError::Infrastructure(_)
                | SubscriptionError::Gateway {
                    failure: GatewayFailure::Unavailable,
                    ..
                }
        )
    }
}

impl std::fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for SubscriptionError {}

impl From<ValidationError> for SubscriptionError {
    fn from(err: ValidationError) -> Self {
        SubscriptionError::ValidationFailed {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<DomainError> for SubscriptionError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::ValidationFailed => SubscriptionError::ValidationFailed {
                field: err
                    .details
                    .get("field")
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string()),
                message: err.message,
            },
            _ => SubscriptionError::Infrastructure(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user_id() -> UserId {
        UserId::new("user-test-123").unwrap()
    }

    // ============================================================
    // Code Tests
    // ============================================================

    #[test]
    fn plan_not_found_maps_to_plan_code() {
        let err = SubscriptionError::plan_not_found(PlanId::new("gold").unwrap());
        assert_eq!(err.code(), ErrorCode::PlanNotFound);
        assert!(err.message().contains("gold"));
    }

    #[test]
    fn unknown_outcome_has_distinct_code() {
        let unknown = SubscriptionError::gateway(GatewayFailure::OutcomeUnknown, "timed out");
        let rejected = SubscriptionError::gateway(GatewayFailure::Rejected, "bad price");

        assert_eq!(unknown.code(), ErrorCode::GatewayOutcomeUnknown);
        assert_eq!(rejected.code(), ErrorCode::GatewayError);
    }

    #[test]
    fn conflict_message_includes_user() {
        let err = SubscriptionError::conflict(test_user_id(), "already active");
        assert_eq!(err.code(), ErrorCode::ActiveSubscriptionConflict);
        assert!(err.message().contains("user-test-123"));
    }

    // ============================================================
    // Retryable Tests
    // ============================================================

    #[test]
    fn rate_limited_is_retryable() {
        assert!(SubscriptionError::rate_limited("slow down").is_retryable());
    }

    #[test]
    fn rejected_gateway_call_is_not_retryable() {
        let err = SubscriptionError::gateway(GatewayFailure::Rejected, "no such price");
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_outcome_is_not_retryable() {
        let err = SubscriptionError::gateway(GatewayFailure::OutcomeUnknown, "timed out");
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        assert!(!SubscriptionError::validation("plan_id", "same plan").is_retryable());
    }

    // ============================================================
    // Conversion Tests
    // ============================================================

    #[test]
    fn validation_error_converts_with_field() {
        let err: SubscriptionError = ValidationError::empty_field("user_id").into();
        assert!(matches!(
            err,
            SubscriptionError::ValidationFailed { ref field, .. } if field == "user_id"
        ));
    }

    #[test]
    fn database_error_converts_to_infrastructure() {
        let err: SubscriptionError = DomainError::database("connection reset").into();
        assert!(matches!(err, SubscriptionError::Infrastructure(ref m) if m.contains("connection reset")));
    }
}
