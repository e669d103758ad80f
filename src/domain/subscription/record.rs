//! Subscription - a ledger record of who is subscribed to what.
//!
//! Rows are never edited in place when a plan changes: the old row is
//! deactivated and a new active row is inserted, so the ledger keeps the
//! history of every plan a user held.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PlanId, SubscriptionId, Timestamp, UserId};

/// A single ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub provider_subscription_id: String,
    pub period_end: Timestamp,
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl Subscription {
    /// Creates a new active row.
    pub fn activate(
        user_id: UserId,
        plan_id: PlanId,
        provider_subscription_id: impl Into<String>,
        period_end: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            user_id,
            plan_id,
            provider_subscription_id: provider_subscription_id.into(),
            period_end,
            is_active: true,
            created_at: Timestamp::now(),
        }
    }

    /// Creates the row that replaces `self` after an in-place plan change.
    ///
    /// The successor keeps the user and takes the plan, provider id and
    /// period end reported by the provider after the modification.
    pub fn successor(
        &self,
        plan_id: PlanId,
        provider_subscription_id: impl Into<String>,
        period_end: Timestamp,
    ) -> Self {
        Self::activate(
            self.user_id.clone(),
            plan_id,
            provider_subscription_id,
            period_end,
        )
    }

    /// Returns true if this row belongs to `user_id`.
    pub fn is_owned_by(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }

    /// Returns true if this row is backed by the given provider subscription.
    pub fn tracks(&self, provider_subscription_id: &str) -> bool {
        self.provider_subscription_id == provider_subscription_id
    }
}
