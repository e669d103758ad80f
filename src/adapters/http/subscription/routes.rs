//! Axum router configuration for subscription endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    cancel_subscription, get_plan, get_subscription, handle_webhook, health_check, list_plans,
    list_subscriptions, request_plan_change, SubscriptionAppState,
};

/// Create the subscription API router.
///
/// # Routes
///
/// ## Public
/// - `GET /packages` - List plans
/// - `GET /packages/:plan_id` - Get one plan
///
/// ## User Endpoints (require authentication)
/// - `POST /subscription/:plan_id/checkout` - Change plan or start checkout
/// - `POST /cancel_subscription/:subscription_id` - Cancel a subscription
/// - `GET /subscription` - List the caller's subscriptions
/// - `GET /subscription/:subscription_id` - Get one of the caller's subscriptions
pub fn subscription_routes() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/packages", get(list_plans))
        .route("/packages/:plan_id", get(get_plan))
        .route("/subscription", get(list_subscriptions))
        // One parameter name per segment; `:id` is a subscription id on the
        // GET route and a plan id on the checkout route.
        .route("/subscription/:id", get(get_subscription))
        .route("/subscription/:id/checkout", post(request_plan_change))
        .route(
            "/cancel_subscription/:subscription_id",
            post(cancel_subscription),
        )
}

/// Create the webhook router.
///
/// Separate from the user routes because webhooks carry no user identity;
/// they are authenticated by signature.
pub fn webhook_routes() -> Router<SubscriptionAppState> {
    Router::new().route("/webhook", post(handle_webhook))
}

/// Create the complete service router.
pub fn subscription_router() -> Router<SubscriptionAppState> {
    Router::new()
        .route("/health", get(health_check))
        .merge(subscription_routes())
        .merge(webhook_routes())
}
