//! Subscription module - plans, ledger records, and provider lifecycle events.
//!
//! # Invariants
//!
//! - A user has at most one active ledger row at any instant.
//! - Every active row points at a provider subscription that still bills.
//! - Replaying a provider event id never changes the ledger twice.

mod errors;
mod plan;
mod provider_event;
mod record;
mod webhook_errors;
mod webhook_processor;

pub use errors::{GatewayFailure, SubscriptionError};
pub use plan::Plan;
pub use provider_event::{
    is_terminal_status, ProviderEvent, ProviderEventData, ProviderEventType, SubscriptionCreated,
    SubscriptionEvent, SubscriptionSnapshot, SubscriptionUpdated, METADATA_PLAN_ID,
    METADATA_USER_ID,
};
pub use record::Subscription;
pub use webhook_errors::WebhookError;
pub use webhook_processor::{IdempotentWebhookProcessor, WebhookDispatcher, WebhookEventHandler};
