//! Queries over the caller's own ledger rows.

use std::sync::Arc;

use crate::domain::foundation::{SubscriptionId, UserId};
use crate::domain::subscription::{Subscription, SubscriptionError};
use crate::ports::SubscriptionLedger;

/// Query to list the caller's subscriptions, newest first.
#[derive(Debug, Clone)]
pub struct ListSubscriptionsQuery {
    pub user_id: UserId,
}

pub struct ListSubscriptionsHandler {
    ledger: Arc<dyn SubscriptionLedger>,
}

impl ListSubscriptionsHandler {
    pub fn new(ledger: Arc<dyn SubscriptionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(
        &self,
        query: ListSubscriptionsQuery,
    ) -> Result<Vec<Subscription>, SubscriptionError> {
        Ok(self.ledger.list_for_user(&query.user_id).await?)
    }
}

/// Query to get one of the caller's subscriptions.
#[derive(Debug, Clone)]
pub struct GetSubscriptionQuery {
    pub user_id: UserId,
    pub subscription_id: SubscriptionId,
}

/// Handler for a single subscription.
///
/// Rows owned by someone else are reported as not found.
pub struct GetSubscriptionHandler {
    ledger: Arc<dyn SubscriptionLedger>,
}

impl GetSubscriptionHandler {
    pub fn new(ledger: Arc<dyn SubscriptionLedger>) -> Self {
        Self { ledger }
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionQuery,
    ) -> Result<Subscription, SubscriptionError> {
        self.ledger
            .find_for_user(&query.subscription_id, &query.user_id)
            .await?
            .ok_or(SubscriptionError::SubscriptionNotFound(query.subscription_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionLedger;
    use crate::domain::foundation::{PlanId, Timestamp};

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn ledger_with_row() -> (Arc<InMemorySubscriptionLedger>, Subscription) {
        let ledger = Arc::new(InMemorySubscriptionLedger::new());
        let row = Subscription::activate(
            user("user-1"),
            PlanId::new("basic").unwrap(),
            "sub_1",
            Timestamp::from_unix_secs(1_800_000_000).unwrap(),
        );
        ledger.insert_active(&row).await.unwrap();
        (ledger, row)
    }

    #[tokio::test]
    async fn lists_only_callers_rows() {
        let (ledger, _) = ledger_with_row().await;
        let handler = ListSubscriptionsHandler::new(ledger);

        let mine = handler
            .handle(ListSubscriptionsQuery { user_id: user("user-1") })
            .await
            .unwrap();
        let theirs = handler
            .handle(ListSubscriptionsQuery { user_id: user("user-2") })
            .await
            .unwrap();

        assert_eq!(mine.len(), 1);
        assert!(theirs.is_empty());
    }

    #[tokio::test]
    async fn other_users_row_is_not_found() {
        let (ledger, row) = ledger_with_row().await;
        let handler = GetSubscriptionHandler::new(ledger);

        let err = handler
            .handle(GetSubscriptionQuery {
                user_id: user("user-2"),
                subscription_id: row.id,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::SubscriptionNotFound(_)));
    }

    #[tokio::test]
    async fn owner_gets_row() {
        let (ledger, row) = ledger_with_row().await;
        let handler = GetSubscriptionHandler::new(ledger);

        let found = handler
            .handle(GetSubscriptionQuery {
                user_id: user("user-1"),
                subscription_id: row.id,
            })
            .await
            .unwrap();

        assert_eq!(found, row);
    }
}
