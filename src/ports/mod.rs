//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `PaymentGateway` - the billing provider
//! - `SubscriptionLedger` - local subscription rows
//! - `PlanCatalog` - plan reference data
//! - `WebhookEventRepository` - webhook idempotency tracking

mod payment_gateway;
mod plan_catalog;
mod subscription_ledger;
mod webhook_event_repository;

pub use payment_gateway::{
    CheckoutSession, CreateCheckoutRequest, Customer, GatewayError, GatewayErrorCode,
    ModifySubscriptionRequest, PaymentGateway, ProviderSubscription,
};
pub use plan_catalog::PlanCatalog;
pub use subscription_ledger::SubscriptionLedger;
pub use webhook_event_repository::{
    EventOutcome, SaveResult, WebhookEventRecord, WebhookEventRepository, WebhookResult,
};
