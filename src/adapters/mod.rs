//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `http` - axum REST surface
//! - `memory` - in-process ledger, catalog and event log
//! - `postgres` - sqlx-backed ledger, catalog and event log
//! - `stripe` - payment gateway client and webhook verification

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;
