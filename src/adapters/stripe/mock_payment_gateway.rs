//! Mock payment gateway for testing.
//!
//! Provides a configurable implementation of `PaymentGateway` for unit and
//! integration tests. Supports:
//! - A provider-side subscription store
//! - Error injection per method
//! - Call tracking
//! - Real webhook signatures, so authenticity checks are exercised

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use secrecy::SecretString;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::{ProviderEvent, WebhookError};
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, Customer, GatewayError, ModifySubscriptionRequest,
    PaymentGateway, ProviderSubscription,
};

use super::webhook_types::{signature_header, verify_signature};

/// Signing secret used by `MockPaymentGateway::sign`.
pub const MOCK_WEBHOOK_SECRET: &str = "whsec_mock_secret";

/// Mock payment gateway for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentGateway::new();
/// mock.add_subscription(MockPaymentGateway::active_subscription("sub_1", "price_basic"));
/// mock.set_method_error("modify_subscription", GatewayError::timeout("slow"));
///
/// let header = mock.sign(&payload);
/// let event = mock.verify_webhook(payload.as_bytes(), &header).await?;
/// ```
#[derive(Clone)]
pub struct MockPaymentGateway {
    inner: Arc<Mutex<MockState>>,
    webhook_secret: SecretString,
}

#[derive(Default)]
struct MockState {
    /// Customers by email.
    customers: HashMap<String, Customer>,

    /// Provider subscriptions by id.
    subscriptions: HashMap<String, ProviderSubscription>,

    /// Specific errors by method name, returned on every call until cleared.
    method_errors: HashMap<String, GatewayError>,

    /// Track method calls for assertions.
    call_log: Vec<MethodCall>,

    /// Checkout requests as received.
    checkout_requests: Vec<CreateCheckoutRequest>,

    next_id: u32,
}

impl MockState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_mock_{}", prefix, self.next_id)
    }
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self {
            inner: Arc::default(),
            webhook_secret: SecretString::new(MOCK_WEBHOOK_SECRET.to_string()),
        }
    }
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// An active subscription with one item on `price_id`, renewing in thirty days.
    pub fn active_subscription(id: &str, price_id: &str) -> ProviderSubscription {
        ProviderSubscription {
            id: id.to_string(),
            status: "active".to_string(),
            current_period_end: Timestamp::from_datetime(
                chrono::Utc::now() + chrono::Duration::days(30),
            ),
            item_id: Some(format!("si_{}", id)),
            price_id: Some(price_id.to_string()),
            metadata: HashMap::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Configuration Methods
    // ════════════════════════════════════════════════════════════════════════════

    /// Add a subscription to the provider-side store.
    pub fn add_subscription(&self, subscription: ProviderSubscription) {
        let id = subscription.id.clone();
        self.inner
            .lock()
            .unwrap()
            .subscriptions
            .insert(id, subscription);
    }

    /// Provider-side view of a subscription.
    pub fn subscription(&self, id: &str) -> Option<ProviderSubscription> {
        self.inner.lock().unwrap().subscriptions.get(id).cloned()
    }

    /// Set an error for a specific method.
    pub fn set_method_error(&self, method: &str, error: GatewayError) {
        self.inner
            .lock()
            .unwrap()
            .method_errors
            .insert(method.to_string(), error);
    }

    /// Clear all configured errors.
    pub fn clear_errors(&self) {
        self.inner.lock().unwrap().method_errors.clear();
    }

    /// Sign a payload the way Stripe does, timestamped now.
    pub fn sign(&self, payload: &str) -> String {
        signature_header(
            &self.webhook_secret,
            chrono::Utc::now().timestamp(),
            payload.as_bytes(),
        )
        .unwrap_or_default()
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    /// Get all recorded method calls.
    pub fn calls(&self) -> Vec<MethodCall> {
        self.inner.lock().unwrap().call_log.clone()
    }

    /// Check if a method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.call_count(method) > 0
    }

    /// Number of calls to a method.
    pub fn call_count(&self, method: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Every checkout request received.
    pub fn checkout_requests(&self) -> Vec<CreateCheckoutRequest> {
        self.inner.lock().unwrap().checkout_requests.clone()
    }

    /// Record the call and return the configured error for it, if any.
    fn record_call(&self, method: &str, args: Vec<String>) -> Result<(), GatewayError> {
        let mut state = self.inner.lock().unwrap();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        match state.method_errors.get(method) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn find_or_create_customer(
        &self,
        email: &str,
        name: &str,
    ) -> Result<Customer, GatewayError> {
        self.record_call(
            "find_or_create_customer",
            vec![email.to_string(), name.to_string()],
        )?;

        let mut state = self.inner.lock().unwrap();
        if let Some(customer) = state.customers.get(email) {
            return Ok(customer.clone());
        }

        let customer = Customer {
            id: state.next_id("cus"),
            email: Some(email.to_string()),
        };
        state.customers.insert(email.to_string(), customer.clone());
        Ok(customer)
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.record_call("retrieve_subscription", vec![subscription_id.to_string()])?;

        self.subscription(subscription_id)
            .ok_or_else(|| GatewayError::not_found("Subscription"))
    }

    async fn modify_subscription(
        &self,
        request: ModifySubscriptionRequest,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.record_call(
            "modify_subscription",
            vec![
                request.subscription_id.clone(),
                request.new_price_id.clone(),
                request.idempotency_key.clone(),
            ],
        )?;

        let mut state = self.inner.lock().unwrap();
        let sub = state
            .subscriptions
            .get_mut(&request.subscription_id)
            .ok_or_else(|| GatewayError::not_found("Subscription"))?;

        if sub.item_id.as_deref() != Some(request.item_id.as_str()) {
            return Err(GatewayError::invalid_request(format!(
                "No such subscription item: {}",
                request.item_id
            )));
        }

        sub.price_id = Some(request.new_price_id);
        Ok(sub.clone())
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        self.record_call(
            "cancel_subscription",
            vec![subscription_id.to_string(), idempotency_key.to_string()],
        )?;

        let mut state = self.inner.lock().unwrap();
        let sub = state
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| GatewayError::not_found("Subscription"))?;
        sub.status = "canceled".to_string();
        Ok(sub.clone())
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        self.record_call(
            "create_checkout_session",
            vec![request.customer_id.clone(), request.price_id.clone()],
        )?;

        let mut state = self.inner.lock().unwrap();
        let id = state.next_id("cs");
        state.checkout_requests.push(request);

        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.com/c/pay/{}", id),
            id,
        })
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        self.record_call("verify_webhook", vec![signature.to_string()])
            .map_err(|e| WebhookError::Database(e.to_string()))?;

        verify_signature(
            &self.webhook_secret,
            payload,
            signature,
            chrono::Utc::now().timestamp(),
        )?;

        serde_json::from_slice(payload)
            .map_err(|e| WebhookError::ParseError(format!("Invalid JSON: {}", e)))
    }
}
