//! Stripe payment gateway adapter.
//!
//! Implements the `PaymentGateway` port for Stripe, including:
//! - Customer lookup and creation
//! - Subscription retrieval, price changes and cancellation
//! - Checkout sessions
//! - Webhook signature verification
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod mock_payment_gateway;
mod retry;
mod stripe_gateway;
mod webhook_types;

pub use mock_payment_gateway::{MethodCall, MockPaymentGateway, MOCK_WEBHOOK_SECRET};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use stripe_gateway::{StripeConfig, StripeGateway};
pub use webhook_types::{
    signature_header, verify_signature, SignatureHeader, SignatureParseError,
};
