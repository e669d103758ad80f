//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, the timestamp value object, and the error types
//! shared by every other layer.

mod errors;
mod ids;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{PlanId, SubscriptionId, UserId};
pub use timestamp::Timestamp;
