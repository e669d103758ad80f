//! RequestPlanChangeHandler - Command handler for subscribing or switching plans.
//!
//! A user with a live provider subscription is moved in place: the provider
//! swaps the price and prorates, then the ledger supersedes the old row. A
//! user without one is sent to hosted checkout, and the ledger is written
//! only when the provider's `subscription.created` webhook arrives.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::application::UserLocks;
use crate::domain::foundation::{PlanId, UserId};
use crate::domain::subscription::{
    GatewayFailure, Plan, Subscription, SubscriptionError, METADATA_PLAN_ID, METADATA_USER_ID,
};
use crate::ports::{
    CreateCheckoutRequest, GatewayErrorCode, ModifySubscriptionRequest, PaymentGateway,
    PlanCatalog, ProviderSubscription, SubscriptionLedger,
};

/// Command to put a user on a plan.
#[derive(Debug, Clone)]
pub struct RequestPlanChangeCommand {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
    pub plan_id: PlanId,
}

/// Result of a plan change request.
#[derive(Debug, Clone)]
pub enum RequestPlanChangeResult {
    /// The existing provider subscription was moved to the new plan.
    Updated {
        previous: Subscription,
        current: Subscription,
    },
    /// The user must complete checkout; nothing was written locally.
    CheckoutRequired {
        checkout_url: String,
        session_id: String,
    },
}

/// Where hosted checkout sends the customer afterwards.
#[derive(Debug, Clone)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

/// Handler for plan change requests.
pub struct RequestPlanChangeHandler {
    plans: Arc<dyn PlanCatalog>,
    ledger: Arc<dyn SubscriptionLedger>,
    gateway: Arc<dyn PaymentGateway>,
    locks: Arc<UserLocks>,
    urls: CheckoutUrls,
}

impl RequestPlanChangeHandler {
    pub fn new(
        plans: Arc<dyn PlanCatalog>,
        ledger: Arc<dyn SubscriptionLedger>,
        gateway: Arc<dyn PaymentGateway>,
        locks: Arc<UserLocks>,
        urls: CheckoutUrls,
    ) -> Self {
        Self {
            plans,
            ledger,
            gateway,
            locks,
            urls,
        }
    }

    pub async fn handle(
        &self,
        cmd: RequestPlanChangeCommand,
    ) -> Result<RequestPlanChangeResult, SubscriptionError> {
        // 1. Resolve the plan
        let plan = self
            .plans
            .find(&cmd.plan_id)
            .await?
            .ok_or_else(|| SubscriptionError::plan_not_found(cmd.plan_id.clone()))?;

        // 2. Make sure the provider knows the customer
        let customer = self
            .gateway
            .find_or_create_customer(&cmd.email, &cmd.name)
            .await?;

        // 3. Everything from reading the active row to writing the ledger
        //    happens under the user's lock
        let guard = self.locks.lock(&cmd.user_id).await;

        // A stale row is deactivated before the same-plan check so it cannot
        // block buying that plan again.
        if let Some(active) = self.ledger.find_active_for_user(&cmd.user_id).await? {
            if let Some(provider_sub) = self.live_provider_subscription(&active).await? {
                if active.plan_id == plan.id {
                    return Err(SubscriptionError::validation(
                        "plan_id",
                        format!("Already subscribed to plan {}", plan.id),
                    ));
                }
                return self.change_in_place(guard, active, provider_sub, &plan).await;
            }
        }

        // 4. No live subscription: hosted checkout
        let metadata = HashMap::from([
            (METADATA_USER_ID.to_string(), cmd.user_id.to_string()),
            (METADATA_PLAN_ID.to_string(), plan.id.to_string()),
        ]);

        let session = self
            .gateway
            .create_checkout_session(CreateCheckoutRequest {
                price_id: plan.provider_price_id.clone(),
                customer_id: customer.id,
                success_url: self.urls.success_url.clone(),
                cancel_url: self.urls.cancel_url.clone(),
                metadata,
                idempotency_key: uuid::Uuid::new_v4().to_string(),
            })
            .await?;

        tracing::info!(
            user_id = %cmd.user_id,
            plan_id = %plan.id,
            session_id = %session.id,
            "Checkout session created"
        );

        Ok(RequestPlanChangeResult::CheckoutRequired {
            checkout_url: session.url,
            session_id: session.id,
        })
    }

    /// Fetch the provider subscription behind `active`.
    ///
    /// A subscription the provider no longer bills (terminal, or gone) means
    /// the local row is stale: it is deactivated and `None` is returned.
    async fn live_provider_subscription(
        &self,
        active: &Subscription,
    ) -> Result<Option<ProviderSubscription>, SubscriptionError> {
        let stale_status = match self
            .gateway
            .retrieve_subscription(&active.provider_subscription_id)
            .await
        {
            Ok(provider_sub) if !provider_sub.is_terminal() => return Ok(Some(provider_sub)),
            Ok(provider_sub) => provider_sub.status,
            Err(e) if e.code == GatewayErrorCode::NotFound => "missing".to_string(),
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(
            subscription_id = %active.id,
            provider_subscription_id = %active.provider_subscription_id,
            provider_status = %stale_status,
            "Active row points at a subscription the provider no longer bills; deactivating"
        );
        self.ledger.deactivate(&active.id).await?;

        Ok(None)
    }

    /// Move the provider subscription to `plan`, then swap the ledger rows.
    ///
    /// Once the provider has accepted the change the swap runs on its own
    /// task holding the user's lock, so it completes even when the caller
    /// stops waiting (a client disconnect or a request timeout).
    async fn change_in_place(
        &self,
        guard: OwnedMutexGuard<()>,
        active: Subscription,
        provider_sub: ProviderSubscription,
        plan: &Plan,
    ) -> Result<RequestPlanChangeResult, SubscriptionError> {
        let item_id = provider_sub.item_id.clone().ok_or_else(|| {
            SubscriptionError::gateway(
                GatewayFailure::Unavailable,
                format!("Subscription {} has no items", provider_sub.id),
            )
        })?;

        let updated = self
            .gateway
            .modify_subscription(ModifySubscriptionRequest {
                subscription_id: provider_sub.id.clone(),
                item_id,
                new_price_id: plan.provider_price_id.clone(),
                idempotency_key: uuid::Uuid::new_v4().to_string(),
            })
            .await?;

        let replacement =
            active.successor(plan.id.clone(), updated.id.clone(), updated.current_period_end);

        let ledger = self.ledger.clone();
        let swap = tokio::spawn({
            let active = active.clone();
            let replacement = replacement.clone();
            async move {
                let _guard = guard;
                swap_rows(ledger.as_ref(), &active, &replacement, &updated.id).await
            }
        });

        swap.await.map_err(|e| {
            SubscriptionError::infrastructure(format!("Ledger swap task failed: {}", e))
        })??;

        tracing::info!(
            user_id = %active.user_id,
            from_plan = %active.plan_id,
            to_plan = %plan.id,
            "Plan changed in place"
        );

        Ok(RequestPlanChangeResult::Updated {
            previous: active,
            current: replacement,
        })
    }
}

async fn swap_rows(
    ledger: &dyn SubscriptionLedger,
    active: &Subscription,
    replacement: &Subscription,
    provider_subscription_id: &str,
) -> Result<(), SubscriptionError> {
    ledger.supersede(&active.id, replacement).await.map_err(|e| {
        tracing::error!(
            user_id = %active.user_id,
            provider_subscription_id = %provider_subscription_id,
            error = %e,
            "Provider subscription changed but ledger swap failed"
        );
        if e.is_conflict() {
            SubscriptionError::conflict(active.user_id.clone(), e.message)
        } else {
            SubscriptionError::from(e)
        }
    })
}
