//! SubscriptionLedger port - authoritative local store of subscription rows.
//!
//! Implementations enforce that a user has at most one active row. Every
//! write that could add a second one fails with
//! `ErrorCode::ActiveSubscriptionConflict` instead of succeeding silently,
//! and `supersede` fails with `ErrorCode::StaleSubscription` when the row it
//! replaces was no longer active.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::Subscription;

/// Ledger operations.
#[async_trait]
pub trait SubscriptionLedger: Send + Sync {
    /// Load a row by id, but only if it belongs to `user_id`.
    async fn find_for_user(
        &self,
        id: &SubscriptionId,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// The user's active row, if any.
    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError>;

    /// Every row backed by a provider subscription, newest first.
    ///
    /// In-place plan changes keep the provider id, so several rows may match;
    /// at most one of them is active.
    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Vec<Subscription>, DomainError>;

    /// All of a user's rows, newest first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError>;

    /// Insert a new active row.
    ///
    /// # Errors
    ///
    /// - `ActiveSubscriptionConflict` if the user already has an active row
    /// - `DatabaseError` on infrastructure failure
    async fn insert_active(&self, subscription: &Subscription) -> Result<(), DomainError>;

    /// Deactivate `previous` and insert `replacement` as one atomic change.
    ///
    /// Either both writes land or neither does.
    ///
    /// # Errors
    ///
    /// - `StaleSubscription` if `previous` is not currently active
    /// - `ActiveSubscriptionConflict` if another active row appeared meanwhile
    /// - `DatabaseError` on infrastructure failure
    async fn supersede(
        &self,
        previous: &SubscriptionId,
        replacement: &Subscription,
    ) -> Result<(), DomainError>;

    /// Refresh the provider id and period end of a row.
    ///
    /// The period end never moves backwards, so a stale event delivered late
    /// cannot shorten a period. Returns the row as stored afterwards.
    ///
    /// # Errors
    ///
    /// - `SubscriptionNotFound` if the row does not exist
    async fn update_provider_state(
        &self,
        id: &SubscriptionId,
        provider_subscription_id: &str,
        period_end: Timestamp,
    ) -> Result<Subscription, DomainError>;

    /// Mark a row inactive.
    ///
    /// Returns `true` if the row was active before this call.
    async fn deactivate(&self, id: &SubscriptionId) -> Result<bool, DomainError>;
}
