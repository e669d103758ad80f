//! Payment configuration

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use super::error::ValidationError;

/// Payment configuration (Stripe)
#[derive(Clone, Deserialize)]
pub struct PaymentConfig {
    /// Stripe API key
    pub stripe_api_key: String,

    /// Stripe webhook signing secret
    pub stripe_webhook_secret: String,

    /// Stripe API base URL; overridden for stripe-mock in local runs
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Where hosted checkout sends the customer after paying
    pub checkout_success_url: String,

    /// Where hosted checkout sends the customer after backing out
    pub checkout_cancel_url: String,

    /// Drop webhook events that were not sent in live mode
    #[serde(default)]
    pub require_livemode: bool,

    /// Per-call timeout for Stripe API requests, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts for read-only Stripe calls; mutating calls are never retried
    #[serde(default = "default_max_read_attempts")]
    pub max_read_attempts: u32,

    /// How long processed webhook ids are kept for deduplication, in days
    #[serde(default = "default_webhook_retention_days")]
    pub webhook_retention_days: u32,
}

impl PaymentConfig {
    /// Check if using Stripe test mode
    pub fn is_test_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_test_")
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key.starts_with("sk_live_")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn webhook_retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.webhook_retention_days))
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_api_key.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"));
        }
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired(
                "PAYMENT__STRIPE_WEBHOOK_SECRET",
            ));
        }

        // Verify key prefixes for safety
        if !self.stripe_api_key.starts_with("sk_") {
            return Err(ValidationError::InvalidStripeKey);
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        if self.require_livemode && !self.is_live_mode() {
            return Err(ValidationError::LiveKeyRequired);
        }

        if !is_http_url(&self.checkout_success_url) {
            return Err(ValidationError::InvalidRedirectUrl("checkout_success_url"));
        }
        if !is_http_url(&self.checkout_cancel_url) {
            return Err(ValidationError::InvalidRedirectUrl("checkout_cancel_url"));
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > 120 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_read_attempts == 0 || self.max_read_attempts > 10 {
            return Err(ValidationError::InvalidRetryAttempts);
        }
        if self.webhook_retention_days == 0 {
            return Err(ValidationError::InvalidRetention);
        }

        Ok(())
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            stripe_api_key: String::new(),
            stripe_webhook_secret: String::new(),
            api_base_url: default_api_base_url(),
            checkout_success_url: String::new(),
            checkout_cancel_url: String::new(),
            require_livemode: false,
            request_timeout_secs: default_request_timeout(),
            max_read_attempts: default_max_read_attempts(),
            webhook_retention_days: default_webhook_retention_days(),
        }
    }
}

impl fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("stripe_api_key", &"[REDACTED]")
            .field("stripe_webhook_secret", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url)
            .field("checkout_success_url", &self.checkout_success_url)
            .field("checkout_cancel_url", &self.checkout_cancel_url)
            .field("require_livemode", &self.require_livemode)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_read_attempts", &self.max_read_attempts)
            .field("webhook_retention_days", &self.webhook_retention_days)
            .finish()
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn default_api_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_read_attempts() -> u32 {
    3
}

fn default_webhook_retention_days() -> u32 {
    30
}
