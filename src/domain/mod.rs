//! Domain layer containing business logic and domain types.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, errors)
//! - `subscription` - Plans, ledger records, provider events and webhook processing

pub mod foundation;
pub mod subscription;
