//! HTTP adapters - REST API implementations.

pub mod subscription;

// Re-export key types for convenience
pub use subscription::subscription_router;
pub use subscription::SubscriptionAppState;
