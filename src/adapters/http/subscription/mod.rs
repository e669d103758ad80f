//! HTTP adapter for subscription endpoints.
//!
//! Exposes the subscription lifecycle via REST API:
//! - `GET /packages`, `GET /packages/:plan_id` - Plan catalog
//! - `POST /subscription/:plan_id/checkout` - Change plan or start checkout
//! - `POST /cancel_subscription/:subscription_id` - Cancel a subscription
//! - `GET /subscription`, `GET /subscription/:subscription_id` - Caller's subscriptions
//! - `POST /webhook` - Payment provider webhooks
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use dto::*;
pub use handlers::{AuthenticatedUser, SubscriptionAppState, SIGNATURE_HEADER};
pub use routes::{subscription_router, subscription_routes, webhook_routes};
