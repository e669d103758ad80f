//! Stripe payment gateway.
//!
//! Implements the `PaymentGateway` port against the Stripe REST API.
//!
//! # Security
//!
//! - HMAC-SHA256 signature verification with constant-time comparison
//! - Timestamp validation (5-minute window) for replay attack prevention
//! - Secrets handled via `secrecy::SecretString`
//!
//! # Retries
//!
//! Customer lookup and subscription retrieval are retried with backoff.
//! Everything that changes Stripe state is sent once with an `Idempotency-Key`.
//!
//! ```ignore
//! let config = StripeConfig::new(api_key, webhook_secret);
//! let gateway = StripeGateway::new(config)?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::subscription::{ProviderEvent, WebhookError};
use crate::ports::{
    CheckoutSession, CreateCheckoutRequest, Customer, GatewayError, GatewayErrorCode,
    ModifySubscriptionRequest, PaymentGateway, ProviderSubscription,
};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::webhook_types::{
    verify_signature, StripeCheckoutSession, StripeCustomer, StripeErrorResponse, StripeList,
    StripeSubscription,
};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Webhook signing secret (whsec_...).
    webhook_secret: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Whether test-mode events are refused.
    require_livemode: bool,

    /// Per-request timeout.
    timeout: Duration,

    /// Backoff for read-only calls.
    retry: RetryPolicy,
}

impl StripeConfig {
    pub fn new(api_key: impl Into<String>, webhook_secret: impl Into<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key.into()),
            webhook_secret: SecretString::new(webhook_secret.into()),
            api_base_url: "https://api.stripe.com".to_string(),
            require_livemode: false,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Require livemode events in production.
    pub fn with_require_livemode(mut self, require: bool) -> Self {
        self.require_livemode = require;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl std::fmt::Debug for StripeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeConfig")
            .field("api_base_url", &self.api_base_url)
            .field("require_livemode", &self.require_livemode)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Stripe implementation of `PaymentGateway`.
pub struct StripeGateway {
    config: StripeConfig,
    http_client: reqwest::Client,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::provider(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    /// Send a request and turn any non-success status into a `GatewayError`.
    async fn send(&self, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = self.send(request).await?;
        response.json().await.map_err(|e| {
            GatewayError::provider(format!("Failed to parse Stripe response: {}", e))
        })
    }

    async fn list_customers_by_email(&self, email: &str) -> Result<Vec<StripeCustomer>, GatewayError> {
        let request = self
            .http_client
            .get(self.url("/v1/customers"))
            .query(&[("email", email), ("limit", "1")]);
        let list: StripeList<StripeCustomer> = self.send_json(request).await?;
        Ok(list.data)
    }

    async fn fetch_subscription(&self, subscription_id: &str) -> Result<StripeSubscription, GatewayError> {
        let request = self
            .http_client
            .get(self.url(&format!("/v1/subscriptions/{}", subscription_id)));
        self.send_json(request).await
    }
}

fn into_provider_subscription(sub: StripeSubscription) -> Result<ProviderSubscription, GatewayError> {
    ProviderSubscription::try_from(sub).map_err(GatewayError::provider)
}

/// Map a transport failure. A refused connection means nothing was sent; any
/// other failure may have happened after Stripe received the request.
fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::network(err.to_string())
    } else if err.is_timeout() {
        GatewayError::timeout(format!("Stripe request timed out: {}", err))
    } else {
        GatewayError::timeout(format!("Stripe request failed: {}", err))
    }
}

fn error_code_for_status(status: StatusCode) -> GatewayErrorCode {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYMENT_REQUIRED | StatusCode::CONFLICT => {
            GatewayErrorCode::InvalidRequest
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayErrorCode::Authentication,
        StatusCode::NOT_FOUND => GatewayErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => GatewayErrorCode::RateLimited,
        _ => GatewayErrorCode::ProviderError,
    }
}

async fn error_from_response(response: Response) -> GatewayError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let code = error_code_for_status(status);

    let Ok(parsed) = serde_json::from_str::<StripeErrorResponse>(&body) else {
        return GatewayError::new(code, format!("Stripe API error ({}): {}", status, body));
    };

    let message = parsed
        .error
        .message
        .unwrap_or_else(|| format!("Stripe API error ({})", status));
    let error = GatewayError::new(code, message);
    match parsed.error.code.or(parsed.error.error_type) {
        Some(provider_code) => error.with_provider_code(provider_code),
        None => error,
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn find_or_create_customer(
        &self,
        email: &str,
        name: &str,
    ) -> Result<Customer, GatewayError> {
        let existing = retry_with_backoff(
            &self.config.retry,
            || self.list_customers_by_email(email),
            |e: &GatewayError| e.retryable,
        )
        .await?;

        if let Some(customer) = existing.into_iter().find(|c| !c.deleted) {
            return Ok(Customer {
                id: customer.id,
                email: customer.email,
            });
        }

        let request = self
            .http_client
            .post(self.url("/v1/customers"))
            .header(IDEMPOTENCY_HEADER, uuid::Uuid::new_v4().to_string())
            .form(&[("email", email), ("name", name)]);
        let customer: StripeCustomer = self.send_json(request).await?;

        tracing::info!(customer_id = %customer.id, "Created Stripe customer");

        Ok(Customer {
            id: customer.id,
            email: customer.email,
        })
    }

    async fn retrieve_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        let sub = retry_with_backoff(
            &self.config.retry,
            || self.fetch_subscription(subscription_id),
            |e: &GatewayError| e.retryable,
        )
        .await?;
        into_provider_subscription(sub)
    }

    async fn modify_subscription(
        &self,
        request: ModifySubscriptionRequest,
    ) -> Result<ProviderSubscription, GatewayError> {
        let params = [
            ("items[0][id]", request.item_id.as_str()),
            ("items[0][price]", request.new_price_id.as_str()),
            ("proration_behavior", "create_prorations"),
        ];

        let http_request = self
            .http_client
            .post(self.url(&format!("/v1/subscriptions/{}", request.subscription_id)))
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .form(&params);
        let sub: StripeSubscription = self.send_json(http_request).await?;

        tracing::info!(
            subscription_id = %sub.id,
            price_id = %request.new_price_id,
            "Modified Stripe subscription"
        );

        into_provider_subscription(sub)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        idempotency_key: &str,
    ) -> Result<ProviderSubscription, GatewayError> {
        let request = self
            .http_client
            .delete(self.url(&format!("/v1/subscriptions/{}", subscription_id)))
            .header(IDEMPOTENCY_HEADER, idempotency_key);
        let sub: StripeSubscription = self.send_json(request).await?;

        tracing::info!(subscription_id = %sub.id, status = %sub.status, "Canceled Stripe subscription");

        into_provider_subscription(sub)
    }

    async fn create_checkout_session(
        &self,
        request: CreateCheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut params: Vec<(String, String)> = vec![
            ("mode".into(), "subscription".into()),
            ("customer".into(), request.customer_id),
            ("line_items[0][price]".into(), request.price_id),
            ("line_items[0][quantity]".into(), "1".into()),
            ("success_url".into(), request.success_url),
            ("cancel_url".into(), request.cancel_url),
        ];

        let mut metadata: Vec<_> = request.metadata.into_iter().collect();
        metadata.sort();
        for (key, value) in metadata {
            params.push((format!("metadata[{}]", key), value.clone()));
            params.push((format!("subscription_data[metadata][{}]", key), value));
        }

        let http_request = self
            .http_client
            .post(self.url("/v1/checkout/sessions"))
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .form(&params);
        let session: StripeCheckoutSession = self.send_json(http_request).await?;

        let url = session.url.ok_or_else(|| {
            GatewayError::provider(format!("Checkout session {} has no URL", session.id))
        })?;

        Ok(CheckoutSession {
            id: session.id,
            url,
        })
    }

    async fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProviderEvent, WebhookError> {
        verify_signature(
            &self.config.webhook_secret,
            payload,
            signature,
            chrono::Utc::now().timestamp(),
        )?;

        let event: ProviderEvent = serde_json::from_slice(payload).map_err(|e| {
            tracing::warn!(error = %e, "Failed to parse webhook payload");
            WebhookError::ParseError(format!("Invalid JSON: {}", e))
        })?;

        if self.config.require_livemode && !event.livemode {
            tracing::warn!(event_id = %event.id, "Rejected test mode event in production");
            return Err(WebhookError::Ignored(
                "test mode events are not accepted".to_string(),
            ));
        }

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            "Webhook signature verified"
        );

        Ok(event)
    }
}
