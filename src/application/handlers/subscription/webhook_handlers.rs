//! Ledger effects of provider subscription events.
//!
//! Both handlers run under the lock of the user named in the event metadata,
//! the same lock the plan change and cancellation flows take.

use std::sync::Arc;

use async_trait::async_trait;

use crate::application::UserLocks;
use crate::domain::foundation::DomainError;
use crate::domain::subscription::{
    Plan, ProviderEventType, Subscription, SubscriptionCreated, SubscriptionEvent, SubscriptionUpdated,
    WebhookDispatcher, WebhookError, WebhookEventHandler,
};
use crate::ports::{PlanCatalog, SubscriptionLedger};

fn insert_failed(err: DomainError) -> WebhookError {
    if err.is_conflict() {
        WebhookError::Conflict(err.message)
    } else {
        WebhookError::from(err)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// subscription.created
// ════════════════════════════════════════════════════════════════════════════════

/// Records the active row for a subscription the provider just created.
pub struct SubscriptionCreatedHandler {
    plans: Arc<dyn PlanCatalog>,
    ledger: Arc<dyn SubscriptionLedger>,
    locks: Arc<UserLocks>,
}

impl SubscriptionCreatedHandler {
    pub fn new(
        plans: Arc<dyn PlanCatalog>,
        ledger: Arc<dyn SubscriptionLedger>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            plans,
            ledger,
            locks,
        }
    }

    async fn apply(&self, event: &SubscriptionCreated) -> Result<(), WebhookError> {
        let provider_id = &event.snapshot.provider_subscription_id;
        let _guard = self.locks.lock(&event.user_id).await;

        if self.plans.find(&event.plan_id).await?.is_none() {
            return Err(WebhookError::UnknownPlan(event.plan_id.to_string()));
        }

        if event.snapshot.is_terminal() {
            return Err(WebhookError::Ignored(format!(
                "Subscription {} is already {}",
                provider_id,
                event.snapshot.status.as_deref().unwrap_or("terminal")
            )));
        }

        let existing = self.ledger.find_by_provider_subscription_id(provider_id).await?;
        if existing.iter().any(|row| row.is_active) {
            return Err(WebhookError::Ignored(format!(
                "Subscription {} is already recorded",
                provider_id
            )));
        }
        if !existing.is_empty() {
            return Err(WebhookError::Ignored(format!(
                "Subscription {} is no longer active locally",
                provider_id
            )));
        }

        if let Some(active) = self.ledger.find_active_for_user(&event.user_id).await? {
            tracing::error!(
                user_id = %event.user_id,
                active_provider_subscription_id = %active.provider_subscription_id,
                incoming_provider_subscription_id = %provider_id,
                "User already has a different active subscription"
            );
            return Err(WebhookError::Conflict(format!(
                "User {} is already active on {}",
                event.user_id, active.provider_subscription_id
            )));
        }

        let row = Subscription::activate(
            event.user_id.clone(),
            event.plan_id.clone(),
            provider_id.clone(),
            event.snapshot.period_end,
        );
        self.ledger.insert_active(&row).await.map_err(insert_failed)?;

        tracing::info!(
            user_id = %row.user_id,
            plan_id = %row.plan_id,
            provider_subscription_id = %provider_id,
            "Subscription activated from webhook"
        );
        Ok(())
    }
}

#[async_trait]
impl WebhookEventHandler for SubscriptionCreatedHandler {
    async fn handle(&self, event: &SubscriptionEvent) -> Result<(), WebhookError> {
        match event {
            SubscriptionEvent::Created(created) => self.apply(created).await,
            _ => Err(WebhookError::Ignored("Not a created event".to_string())),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// subscription.updated
// ════════════════════════════════════════════════════════════════════════════════

/// Keeps the active row's provider id and period end in step with the provider.
pub struct SubscriptionUpdatedHandler {
    plans: Arc<dyn PlanCatalog>,
    ledger: Arc<dyn SubscriptionLedger>,
    locks: Arc<UserLocks>,
}

impl SubscriptionUpdatedHandler {
    pub fn new(
        plans: Arc<dyn PlanCatalog>,
        ledger: Arc<dyn SubscriptionLedger>,
        locks: Arc<UserLocks>,
    ) -> Self {
        Self {
            plans,
            ledger,
            locks,
        }
    }

    async fn apply(&self, event: &SubscriptionUpdated) -> Result<(), WebhookError> {
        let provider_id = &event.snapshot.provider_subscription_id;
        let _guard = self.locks.lock(&event.user_id).await;

        let rows = self.ledger.find_by_provider_subscription_id(provider_id).await?;

        if let Some(active) = rows.iter().find(|row| row.is_active) {
            if event.snapshot.is_terminal() {
                self.ledger.deactivate(&active.id).await?;
                tracing::info!(
                    subscription_id = %active.id,
                    provider_subscription_id = %provider_id,
                    "Provider subscription ended; row deactivated"
                );
                return Ok(());
            }

            if let Some(plan) = self.billed_plan(event).await? {
                if plan.id != active.plan_id {
                    let replacement = active.successor(
                        plan.id.clone(),
                        provider_id.clone(),
                        active.period_end.latest(event.snapshot.period_end),
                    );
                    self.ledger
                        .supersede(&active.id, &replacement)
                        .await
                        .map_err(insert_failed)?;
                    tracing::info!(
                        user_id = %active.user_id,
                        from_plan = %active.plan_id,
                        to_plan = %plan.id,
                        provider_subscription_id = %provider_id,
                        "Plan synced from provider price"
                    );
                    return Ok(());
                }
            }

            let updated = self
                .ledger
                .update_provider_state(&active.id, provider_id, event.snapshot.period_end)
                .await?;
            tracing::info!(
                subscription_id = %updated.id,
                period_end = %updated.period_end.as_datetime(),
                "Subscription period synced"
            );
            return Ok(());
        }

        if !rows.is_empty() {
            return Err(WebhookError::Ignored(format!(
                "Subscription {} is no longer active locally",
                provider_id
            )));
        }

        self.apply_before_created(event).await
    }

    /// The plan the provider is billing, when the event lists a price we sell.
    async fn billed_plan(&self, event: &SubscriptionUpdated) -> Result<Option<Plan>, WebhookError> {
        let Some(price_id) = &event.snapshot.price_id else {
            return Ok(None);
        };

        let plan = self.plans.find_by_price_id(price_id).await?;
        if plan.is_none() {
            tracing::warn!(
                provider_subscription_id = %event.snapshot.provider_subscription_id,
                price_id = %price_id,
                "Provider price matches no plan; keeping recorded plan"
            );
        }
        Ok(plan)
    }

    /// The update outran the create: record the row now if the metadata
    /// allows it, so the later create coalesces.
    async fn apply_before_created(&self, event: &SubscriptionUpdated) -> Result<(), WebhookError> {
        let provider_id = &event.snapshot.provider_subscription_id;

        if event.snapshot.is_terminal() {
            return Err(WebhookError::Ignored(format!(
                "Subscription {} ended before it was recorded",
                provider_id
            )));
        }

        let Some(plan_id) = &event.plan_id else {
            return Err(WebhookError::Ignored(format!(
                "No local row for {} and no plan metadata",
                provider_id
            )));
        };

        if self.plans.find(plan_id).await?.is_none() {
            return Err(WebhookError::UnknownPlan(plan_id.to_string()));
        }

        if let Some(active) = self.ledger.find_active_for_user(&event.user_id).await? {
            return Err(WebhookError::Ignored(format!(
                "User {} is active on {}",
                event.user_id, active.provider_subscription_id
            )));
        }

        let row = Subscription::activate(
            event.user_id.clone(),
            plan_id.clone(),
            provider_id.clone(),
            event.snapshot.period_end,
        );
        self.ledger.insert_active(&row).await.map_err(insert_failed)?;

        tracing::info!(
            user_id = %row.user_id,
            plan_id = %row.plan_id,
            provider_subscription_id = %provider_id,
            "Subscription activated from out-of-order update"
        );
        Ok(())
    }
}

#[async_trait]
impl WebhookEventHandler for SubscriptionUpdatedHandler {
    async fn handle(&self, event: &SubscriptionEvent) -> Result<(), WebhookError> {
        match event {
            SubscriptionEvent::Updated(updated) => self.apply(updated).await,
            _ => Err(WebhookError::Ignored("Not an updated event".to_string())),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ════════════════════════════════════════════════════════════════════════════════

/// Routes the two recognised subscription events.
pub struct SubscriptionEventDispatcher {
    created: SubscriptionCreatedHandler,
    updated: SubscriptionUpdatedHandler,
}

impl SubscriptionEventDispatcher {
    pub fn new(created: SubscriptionCreatedHandler, updated: SubscriptionUpdatedHandler) -> Self {
        Self { created, updated }
    }
}

#[async_trait]
impl WebhookDispatcher for SubscriptionEventDispatcher {
    fn get_handler(&self, event_type: &ProviderEventType) -> Option<&dyn WebhookEventHandler> {
        match event_type {
            ProviderEventType::SubscriptionCreated => Some(&self.created),
            ProviderEventType::SubscriptionUpdated => Some(&self.updated),
            ProviderEventType::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryPlanCatalog, InMemorySubscriptionLedger};
    use crate::domain::foundation::{PlanId, Timestamp, UserId};
    use crate::domain::subscription::SubscriptionSnapshot;

    struct Fixture {
        dispatcher: SubscriptionEventDispatcher,
        ledger: Arc<InMemorySubscriptionLedger>,
    }

    fn fixture() -> Fixture {
        let plans = Arc::new(InMemoryPlanCatalog::new(vec![
            Plan::new(PlanId::new("basic").unwrap(), "Basic", "price_basic", 1000).unwrap(),
            Plan::new(PlanId::new("pro").unwrap(), "Pro", "price_pro", 2500).unwrap(),
        ]));
        let ledger = Arc::new(InMemorySubscriptionLedger::new());
        let locks = Arc::new(UserLocks::new());
        let dispatcher = SubscriptionEventDispatcher::new(
            SubscriptionCreatedHandler::new(plans.clone(), ledger.clone(), locks.clone()),
            SubscriptionUpdatedHandler::new(plans, ledger.clone(), locks),
        );
        Fixture { dispatcher, ledger }
    }

    fn user() -> UserId {
        UserId::new("user-1").unwrap()
    }

    fn snapshot(provider_id: &str, period_end: i64, status: &str) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            provider_subscription_id: provider_id.to_string(),
            period_end: Timestamp::from_unix_secs(period_end).unwrap(),
            status: Some(status.to_string()),
            price_id: None,
        }
    }

    fn created(provider_id: &str, plan: &str) -> SubscriptionEvent {
        SubscriptionEvent::Created(SubscriptionCreated {
            snapshot: snapshot(provider_id, 1_800_000_000, "active"),
            user_id: user(),
            plan_id: PlanId::new(plan).unwrap(),
        })
    }

    fn updated(provider_id: &str, period_end: i64, status: &str, plan: Option<&str>) -> SubscriptionEvent {
        SubscriptionEvent::Updated(SubscriptionUpdated {
            snapshot: snapshot(provider_id, period_end, status),
            user_id: user(),
            plan_id: plan.map(|p| PlanId::new(p).unwrap()),
        })
    }

    fn billed_at(event: SubscriptionEvent, price: &str) -> SubscriptionEvent {
        match event {
            SubscriptionEvent::Updated(mut updated) => {
                updated.snapshot.price_id = Some(price.to_string());
                SubscriptionEvent::Updated(updated)
            }
            other => other,
        }
    }

    async fn handle(f: &Fixture, event: SubscriptionEvent) -> Result<(), WebhookError> {
        let event_type = match &event {
            SubscriptionEvent::Created(_) => ProviderEventType::SubscriptionCreated,
            _ => ProviderEventType::SubscriptionUpdated,
        };
        f.dispatcher
            .get_handler(&event_type)
            .unwrap()
            .handle(&event)
            .await
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Created
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn created_inserts_active_row() {
        let f = fixture();

        handle(&f, created("sub_1", "basic")).await.unwrap();

        let rows = f.ledger.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_active);
        assert_eq!(rows[0].provider_subscription_id, "sub_1");
        assert_eq!(rows[0].period_end.as_unix_secs(), 1_800_000_000);
    }

    #[tokio::test]
    async fn created_twice_coalesces() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let second = handle(&f, created("sub_1", "basic")).await;

        assert!(matches!(second, Err(WebhookError::Ignored(_))));
        assert_eq!(f.ledger.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn created_for_second_provider_subscription_conflicts() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let second = handle(&f, created("sub_2", "pro")).await;

        assert!(matches!(second, Err(WebhookError::Conflict(_))));
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn created_for_unknown_plan_is_rejected() {
        let f = fixture();

        let result = handle(&f, created("sub_1", "gold")).await;

        assert_eq!(result, Err(WebhookError::UnknownPlan("gold".to_string())));
        assert!(f.ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn created_after_local_cancel_is_ignored() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();
        let row = f.ledger.snapshot().await.remove(0);
        f.ledger.deactivate(&row.id).await.unwrap();

        let result = handle(&f, created("sub_1", "basic")).await;

        assert!(matches!(result, Err(WebhookError::Ignored(_))));
        assert_eq!(f.ledger.active_count().await, 0);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Updated
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn updated_moves_period_forward_only() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        handle(&f, updated("sub_1", 1_900_000_000, "active", None)).await.unwrap();
        handle(&f, updated("sub_1", 1_850_000_000, "active", None)).await.unwrap();

        let rows = f.ledger.snapshot().await;
        assert_eq!(rows[0].period_end.as_unix_secs(), 1_900_000_000);
    }

    #[tokio::test]
    async fn updated_never_changes_plan_of_existing_row() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        handle(&f, updated("sub_1", 1_900_000_000, "active", Some("pro"))).await.unwrap();

        let rows = f.ledger.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plan_id.as_str(), "basic");
    }

    #[tokio::test]
    async fn updated_price_moves_row_to_matching_plan() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let event = billed_at(updated("sub_1", 1_900_000_000, "active", None), "price_pro");
        handle(&f, event).await.unwrap();

        let active = f.ledger.find_active_for_user(&user()).await.unwrap().unwrap();
        assert_eq!(active.plan_id.as_str(), "pro");
        assert_eq!(active.provider_subscription_id, "sub_1");
        assert_eq!(active.period_end.as_unix_secs(), 1_900_000_000);
        assert_eq!(f.ledger.snapshot().await.len(), 2);
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn updated_price_of_current_plan_only_syncs_period() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let event = billed_at(updated("sub_1", 1_900_000_000, "active", None), "price_basic");
        handle(&f, event).await.unwrap();

        let rows = f.ledger.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plan_id.as_str(), "basic");
        assert_eq!(rows[0].period_end.as_unix_secs(), 1_900_000_000);
    }

    #[tokio::test]
    async fn updated_with_unknown_price_keeps_recorded_plan() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let event = billed_at(updated("sub_1", 1_900_000_000, "active", None), "price_gold");
        handle(&f, event).await.unwrap();

        let rows = f.ledger.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].plan_id.as_str(), "basic");
        assert_eq!(rows[0].period_end.as_unix_secs(), 1_900_000_000);
    }

    #[tokio::test]
    async fn updated_before_created_inserts_then_create_coalesces() {
        let f = fixture();

        handle(&f, updated("sub_1", 1_800_000_000, "active", Some("basic")))
            .await
            .unwrap();
        let later = handle(&f, created("sub_1", "basic")).await;

        assert!(matches!(later, Err(WebhookError::Ignored(_))));
        assert_eq!(f.ledger.snapshot().await.len(), 1);
        assert_eq!(f.ledger.active_count().await, 1);
    }

    #[tokio::test]
    async fn updated_without_row_or_plan_is_ignored() {
        let f = fixture();

        let result = handle(&f, updated("sub_1", 1_800_000_000, "active", None)).await;

        assert!(matches!(result, Err(WebhookError::Ignored(_))));
        assert!(f.ledger.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn updated_for_unknown_subscription_while_user_active_is_ignored() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        let result = handle(&f, updated("sub_2", 1_800_000_000, "active", Some("pro"))).await;

        assert!(matches!(result, Err(WebhookError::Ignored(_))));
        assert_eq!(f.ledger.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn terminal_update_deactivates_row() {
        let f = fixture();
        handle(&f, created("sub_1", "basic")).await.unwrap();

        handle(&f, updated("sub_1", 1_800_000_000, "canceled", None)).await.unwrap();

        assert_eq!(f.ledger.active_count().await, 0);
    }

    #[test]
    fn dispatcher_has_no_handler_for_unknown_types() {
        let f = fixture();
        assert!(f.dispatcher.get_handler(&ProviderEventType::Unknown).is_none());
    }
}
