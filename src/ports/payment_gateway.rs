//! Payment gateway port - Interface for the external billing provider.
//!
//! The provider owns billing cycles and payment execution. This port exposes
//! only the calls the subscription lifecycle needs.
//!
//! # Retry Semantics
//!
//! Read-only calls (`find_or_create_customer`'s lookup, `retrieve_subscription`)
//! may be retried by the implementation. Mutating calls carry an idempotency key
//! and are never retried automatically: a timeout on one of them is reported
//! as `GatewayErrorCode::Timeout`, meaning the change may or may not have landed.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{
    is_terminal_status, GatewayFailure, ProviderEvent, SubscriptionError, WebhookError,
};

/// Port for payment provider operations.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Find the customer with this email, creating one if none exists.
    ///
    /// When several customers share the email the first one listed is used.
    async fn find_or_create_customer(
        &self,
        email: &str,
        name: &str,
    ) -> Result<Customer, GatewayError>;

    /// Retrieve a provider subscription.
    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError>;

    /// Swap the subscription's price, asking the provider to prorate.
    async fn modify_subscription(
        &self,
        request: ModifySubscriptionRequest,
    ) -> Result<ProviderSubscription, GatewayError>;

    /// Cancel a subscription immediately.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError>;

    /// Create a hosted checkout session for a new subscription.
    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Verify a webhook signature against the raw payload and parse the event.
    ///
    /// No field of the payload is interpreted before the signature checks out.
    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, WebhookError>;
}

/// Provider customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub email: Option<String>,
}

/// Provider-side state of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSubscription {
    pub id: String,
    pub status: String,
    pub current_period_end: Timestamp,
    /// First subscription item; the one whose price is swapped on plan change.
    pub item_id: Option<String>,
    pub price_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ProviderSubscription {
    /// Returns true if the provider will never bill this subscription again.
    pub fn is_terminal(&self) -> bool {
        is_terminal_status(&self.status)
    }
}

/// Request to swap a subscription to another price.
#[derive(Debug, Clone)]
pub struct ModifySubscriptionRequest {
    pub subscription_id: String,
    pub item_id: String,
    pub new_price_id: String,
    pub idempotency_key: String,
}

/// Request to create a checkout session.
#[derive(Debug, Clone)]
pub struct CreateCheckoutRequest {
    pub price_id: String,
    pub customer_id: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Attached to both the session and the subscription it creates.
    pub metadata: HashMap<String, String>,
    pub idempotency_key: String,
}

/// Hosted checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

/// Payment provider error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    /// Error code for categorization.
    pub code: GatewayErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,

    /// Whether a read-only call may be retried.
    pub retryable: bool,
}

impl GatewayError {
    /// Create a new gateway error.
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
            retryable: code.is_retryable(),
        }
    }

    /// Attach the provider's own error code.
    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::InvalidRequest, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::RateLimited, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::Timeout, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(GatewayErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorCode::ProviderError, message)
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for GatewayError {}

impl From<GatewayError> for SubscriptionError {
    fn from(err: GatewayError) -> Self {
        let failure = match err.code {
            GatewayErrorCode::RateLimited => {
                return SubscriptionError::RateLimited {
                    message: err.message,
                }
            }
            GatewayErrorCode::InvalidRequest
            | GatewayErrorCode::NotFound
            | GatewayErrorCode::Authentication => GatewayFailure::Rejected,
            GatewayErrorCode::Network => GatewayFailure::Unavailable,
            GatewayErrorCode::Timeout | GatewayErrorCode::ProviderError => {
                GatewayFailure::OutcomeUnknown
            }
        };

        SubscriptionError::Gateway {
            failure,
            provider_code: err.provider_code,
            message: err.message,
        }
    }
}

/// Gateway error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorCode {
    /// Provider rejected the request as malformed or not applicable.
    InvalidRequest,

    /// Provider throttled the request.
    RateLimited,

    /// API key rejected.
    Authentication,

    /// Referenced object does not exist at the provider.
    NotFound,

    /// Connection could not be established; the request was not sent.
    Network,

    /// No response in time; the request may have been applied.
    Timeout,

    /// Provider answered with a server error.
    ProviderError,
}

impl GatewayErrorCode {
    /// Check if this error type is typically retryable for read-only calls.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayErrorCode::Network
                | GatewayErrorCode::Timeout
                | GatewayErrorCode::RateLimited
                | GatewayErrorCode::ProviderError
        )
    }
}

impl std::fmt::Display for GatewayErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GatewayErrorCode::InvalidRequest => "invalid_request",
            GatewayErrorCode::RateLimited => "rate_limited",
            GatewayErrorCode::Authentication => "authentication",
            GatewayErrorCode::NotFound => "not_found",
            GatewayErrorCode::Network => "network",
            GatewayErrorCode::Timeout => "timeout",
            GatewayErrorCode::ProviderError => "provider_error",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_gateway_is_object_safe() {
        fn _accepts_dyn(_gateway: &dyn PaymentGateway) {}
    }

    #[test]
    fn retryable_codes_are_transient_ones() {
        assert!(GatewayError::network("refused").retryable);
        assert!(GatewayError::rate_limited("slow").retryable);
        assert!(!GatewayError::invalid_request("bad").retryable);
        assert!(!GatewayError::not_found("Subscription").retryable);
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = GatewayError::invalid_request("No such price").with_provider_code("resource_missing");
        assert_eq!(err.to_string(), "invalid_request: No such price");
        assert_eq!(err.provider_code.as_deref(), Some("resource_missing"));
    }

    #[test]
    fn rate_limit_converts_to_rate_limited() {
        let err: SubscriptionError = GatewayError::rate_limited("Too many requests").into();
        assert!(matches!(err, SubscriptionError::RateLimited { .. }));
    }

    #[test]
    fn invalid_request_converts_to_rejected_gateway_error() {
        let err: SubscriptionError = GatewayError::invalid_request("No such subscription")
            .with_provider_code("resource_missing")
            .into();
        match err {
            SubscriptionError::Gateway {
                failure,
                provider_code,
                ..
            } => {
                assert_eq!(failure, GatewayFailure::Rejected);
                assert_eq!(provider_code.as_deref(), Some("resource_missing"));
            }
            other => panic!("expected Gateway, got {:?}", other),
        }
    }

    #[test]
    fn timeout_converts_to_unknown_outcome() {
        let err: SubscriptionError = GatewayError::timeout("no response").into();
        assert!(matches!(
            err,
            SubscriptionError::Gateway {
                failure: GatewayFailure::OutcomeUnknown,
                ..
            }
        ));
    }

    #[test]
    fn terminal_status_detection() {
        let mut sub = ProviderSubscription {
            id: "sub_1".to_string(),
            status: "active".to_string(),
            current_period_end: Timestamp::now(),
            item_id: Some("si_1".to_string()),
            price_id: Some("price_1".to_string()),
            metadata: HashMap::new(),
        };
        assert!(!sub.is_terminal());
        sub.status = "canceled".to_string();
        assert!(sub.is_terminal());
    }
}
