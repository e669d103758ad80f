//! In-memory subscription ledger.
//!
//! Every write takes the single write lock, so the one-active-row check and
//! the write it guards happen together, which is what the partial unique
//! index gives the PostgreSQL ledger.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, ErrorCode, SubscriptionId, Timestamp, UserId};
use crate::domain::subscription::Subscription;
use crate::ports::SubscriptionLedger;

/// In-memory implementation of the SubscriptionLedger port.
///
/// Does not persist data across restarts.
#[derive(Default)]
pub struct InMemorySubscriptionLedger {
    rows: RwLock<Vec<Subscription>>,
}

impl InMemorySubscriptionLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every row in insertion order.
    ///
    /// Useful for testing and debugging.
    pub async fn snapshot(&self) -> Vec<Subscription> {
        self.rows.read().await.clone()
    }

    /// Number of active rows across all users.
    pub async fn active_count(&self) -> usize {
        self.rows.read().await.iter().filter(|r| r.is_active).count()
    }
}

fn conflict(user_id: &UserId) -> DomainError {
    DomainError::new(
        ErrorCode::ActiveSubscriptionConflict,
        format!("User {} already has an active subscription", user_id),
    )
    .with_detail("user_id", user_id.as_str())
}

fn newest_first(mut rows: Vec<Subscription>) -> Vec<Subscription> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    rows
}

#[async_trait]
impl SubscriptionLedger for InMemorySubscriptionLedger {
    async fn find_for_user(
        &self,
        id: &SubscriptionId,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| &r.id == id && r.is_owned_by(user_id))
            .cloned())
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .find(|r| r.is_active && r.is_owned_by(user_id))
            .cloned())
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(newest_first(
            rows.iter()
                .filter(|r| r.tracks(provider_subscription_id))
                .cloned()
                .collect(),
        ))
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let rows = self.rows.read().await;
        Ok(newest_first(
            rows.iter().filter(|r| r.is_owned_by(user_id)).cloned().collect(),
        ))
    }

    async fn insert_active(&self, subscription: &Subscription) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;
        if rows
            .iter()
            .any(|r| r.is_active && r.is_owned_by(&subscription.user_id))
        {
            return Err(conflict(&subscription.user_id));
        }

        let mut row = subscription.clone();
        row.is_active = true;
        rows.push(row);
        Ok(())
    }

    async fn supersede(
        &self,
        previous: &SubscriptionId,
        replacement: &Subscription,
    ) -> Result<(), DomainError> {
        let mut rows = self.rows.write().await;

        let position = rows
            .iter()
            .position(|r| &r.id == previous && r.is_active && r.is_owned_by(&replacement.user_id))
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::StaleSubscription,
                    format!("Subscription {} is no longer active", previous),
                )
            })?;

        if rows
            .iter()
            .any(|r| r.is_active && &r.id != previous && r.is_owned_by(&replacement.user_id))
        {
            return Err(conflict(&replacement.user_id));
        }

        rows[position].is_active = false;
        let mut row = replacement.clone();
        row.is_active = true;
        rows.push(row);
        Ok(())
    }

    async fn update_provider_state(
        &self,
        id: &SubscriptionId,
        provider_subscription_id: &str,
        period_end: Timestamp,
    ) -> Result<Subscription, DomainError> {
        let mut rows = self.rows.write().await;
        let row = rows.iter_mut().find(|r| &r.id == id).ok_or_else(|| {
            DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription not found: {}", id),
            )
        })?;

        row.provider_subscription_id = provider_subscription_id.to_string();
        row.period_end = row.period_end.latest(period_end);
        Ok(row.clone())
    }

    async fn deactivate(&self, id: &SubscriptionId) -> Result<bool, DomainError> {
        let mut rows = self.rows.write().await;
        match rows.iter_mut().find(|r| &r.id == id) {
            Some(row) if row.is_active => {
                row.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
