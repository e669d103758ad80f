//! In-memory adapters for tests and local development.

mod plan_catalog;
mod subscription_ledger;
mod webhook_event_repository;

pub use plan_catalog::InMemoryPlanCatalog;
pub use subscription_ledger::InMemorySubscriptionLedger;
pub use webhook_event_repository::InMemoryWebhookEventRepository;
