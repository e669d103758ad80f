//! CancelSubscriptionHandler - Command handler for cancelling a subscription.

use std::sync::Arc;

use crate::application::UserLocks;
use crate::domain::foundation::{SubscriptionId, UserId};
use crate::domain::subscription::{Subscription, SubscriptionError};
use crate::ports::{PaymentGateway, SubscriptionLedger};

/// Command to cancel one of the caller's subscriptions.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub user_id: UserId,
    pub subscription_id: SubscriptionId,
}

/// Result of successful cancellation.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    /// The row as it is now, inactive.
    pub subscription: Subscription,
    /// Provider status after cancellation.
    pub provider_status: String,
}

/// Handler for cancelling subscriptions.
///
/// Cancellation is immediate at the provider. The ledger row is deactivated
/// only after the provider confirms.
pub struct CancelSubscriptionHandler {
    ledger: Arc<dyn SubscriptionLedger>,
    gateway: Arc<dyn PaymentGateway>,
    locks: Arc<UserLocks>,
}

impl CancelSubscriptionHandler {
    pub fn new(
        ledger: Arc<dyn SubscriptionLedger>,
        gateway: Arc<dyn PaymentGateway>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            ledger,
            gateway,
            locks,
        }
    }

    pub async fn handle(
        &self,
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, SubscriptionError> {
        let _guard = self.locks.lock(&cmd.user_id).await;

        // 1. Find the caller's row; other users' rows look absent
        let mut subscription = self
            .ledger
            .find_for_user(&cmd.subscription_id, &cmd.user_id)
            .await?
            .ok_or_else(|| SubscriptionError::subscription_not_found(cmd.subscription_id))?;

        if !subscription.is_active {
            return Err(SubscriptionError::validation(
                "subscription_id",
                "Subscription is not active",
            ));
        }

        // 2. Cancel at the provider
        let idempotency_key = format!("cancel-{}", subscription.id);
        let canceled = self
            .gateway
            .cancel_subscription(&subscription.provider_subscription_id, &idempotency_key)
            .await
            .map_err(|e| {
                tracing::warn!(
                    subscription_id = %subscription.id,
                    error = %e,
                    "Provider cancellation failed"
                );
                SubscriptionError::from(e)
            })?;

        // 3. Deactivate locally
        self.ledger.deactivate(&subscription.id).await?;
        subscription.is_active = false;

        tracing::info!(
            user_id = %cmd.user_id,
            subscription_id = %subscription.id,
            provider_status = %canceled.status,
            "Subscription cancelled"
        );

        Ok(CancelSubscriptionResult {
            subscription,
            provider_status: canceled.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionLedger;
    use crate::adapters::stripe::MockPaymentGateway;
    use crate::domain::foundation::{PlanId, Timestamp};
    use crate::domain::subscription::GatewayFailure;
    use crate::ports::GatewayError;

    struct Fixture {
        handler: CancelSubscriptionHandler,
        ledger: Arc<InMemorySubscriptionLedger>,
        gateway: Arc<MockPaymentGateway>,
        row: Subscription,
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(InMemorySubscriptionLedger::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        gateway.add_subscription(MockPaymentGateway::active_subscription("sub_1", "price_basic"));

        let row = Subscription::activate(
            user("user-1"),
            PlanId::new("basic").unwrap(),
            "sub_1",
            Timestamp::from_unix_secs(1_800_000_000).unwrap(),
        );
        ledger.insert_active(&row).await.unwrap();

        let handler =
            CancelSubscriptionHandler::new(ledger.clone(), gateway.clone(), Arc::new(UserLocks::new()));
        Fixture {
            handler,
            ledger,
            gateway,
            row,
        }
    }

    fn command(f: &Fixture, user_id: &str) -> CancelSubscriptionCommand {
        CancelSubscriptionCommand {
            user_id: user(user_id),
            subscription_id: f.row.id,
        }
    }

    #[tokio::test]
    async fn cancels_at_provider_then_deactivates() {
        let f = fixture().await;

        let result = f.handler.handle(command(&f, "user-1")).await.unwrap();

        assert!(!result.subscription.is_active);
        assert_eq!(result.provider_status, "canceled");
        assert_eq!(f.ledger.active_count().await, 0);
        assert!(f.gateway.subscription("sub_1").unwrap().is_terminal());
    }

    #[tokio::test]
    async fn other_users_row_is_not_found() {
        let f = fixture().await;

        let err = f.handler.handle(command(&f, "user-2")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::SubscriptionNotFound(_)));
        assert!(!f.gateway.was_called("cancel_subscription"));
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn inactive_row_is_rejected_without_provider_call() {
        let f = fixture().await;
        f.ledger.deactivate(&f.row.id).await.unwrap();

        let err = f.handler.handle(command(&f, "user-1")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::ValidationFailed { .. }));
        assert!(!f.gateway.was_called("cancel_subscription"));
    }

    #[tokio::test]
    async fn rate_limit_leaves_row_active() {
        let f = fixture().await;
        f.gateway
            .set_method_error("cancel_subscription", GatewayError::rate_limited("slow down"));

        let err = f.handler.handle(command(&f, "user-1")).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::RateLimited { .. }));
        assert!(err.is_retryable());
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_request_is_a_terminal_gateway_error() {
        let f = fixture().await;
        f.gateway.set_method_error(
            "cancel_subscription",
            GatewayError::invalid_request("already canceled").with_provider_code("resource_missing"),
        );

        let err = f.handler.handle(command(&f, "user-1")).await.unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Gateway {
                failure: GatewayFailure::Rejected,
                ..
            }
        ));
        assert!(!err.is_retryable());
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn timeout_is_unknown_outcome_with_no_mutation() {
        let f = fixture().await;
        f.gateway
            .set_method_error("cancel_subscription", GatewayError::timeout("no response"));

        let err = f.handler.handle(command(&f, "user-1")).await.unwrap_err();

        assert!(matches!(
            err,
            SubscriptionError::Gateway {
                failure: GatewayFailure::OutcomeUnknown,
                ..
            }
        ));
        assert_eq!(f.ledger.active_count().await, 1);
    }
}
