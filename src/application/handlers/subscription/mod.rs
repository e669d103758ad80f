//! Subscription handlers.
//!
//! ## Commands
//! - Requesting a plan change (in place, or via checkout)
//! - Cancelling a subscription
//! - Processing provider webhooks
//!
//! ## Queries
//! - Listing and getting plans
//! - Listing and getting the caller's subscriptions

mod cancel_subscription;
mod handle_provider_webhook;
mod plan_queries;
mod request_plan_change;
mod subscription_queries;
mod webhook_handlers;

// Commands
pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use handle_provider_webhook::{
    HandleProviderWebhookCommand, HandleProviderWebhookHandler, HandleProviderWebhookResult,
};
pub use request_plan_change::{
    CheckoutUrls, RequestPlanChangeCommand, RequestPlanChangeHandler, RequestPlanChangeResult,
};
pub use webhook_handlers::{
    SubscriptionCreatedHandler, SubscriptionEventDispatcher, SubscriptionUpdatedHandler,
};

// Queries
pub use plan_queries::{GetPlanHandler, GetPlanQuery, ListPlansHandler, ListPlansQuery};
pub use subscription_queries::{
    GetSubscriptionHandler, GetSubscriptionQuery, ListSubscriptionsHandler,
    ListSubscriptionsQuery,
};
