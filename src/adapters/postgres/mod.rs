//! PostgreSQL adapters - Database implementations for the ledger ports.
//!
//! - `PostgresSubscriptionLedger` - subscription rows, one active per user
//! - `PostgresPlanCatalog` - read-only plan reference data
//! - `PostgresWebhookEventRepository` - processed webhook ids

mod plan_catalog;
mod subscription_ledger;
mod webhook_event_repository;

pub use plan_catalog::PostgresPlanCatalog;
pub use subscription_ledger::PostgresSubscriptionLedger;
pub use webhook_event_repository::PostgresWebhookEventRepository;
