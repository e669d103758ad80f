//! Subscription Sync - keeps a local subscription ledger in step with a
//! payment provider.
//!
//! Plan changes, cancellations and provider webhooks all funnel into a ledger
//! that holds at most one active subscription per user.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
