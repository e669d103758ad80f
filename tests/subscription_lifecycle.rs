//! Integration tests for the subscription lifecycle.
//!
//! Drives the real application handlers against the in-memory ledger and the
//! mock payment gateway:
//! 1. First purchase goes through checkout and lands via webhook
//! 2. Plan changes swap the active row atomically
//! 3. Cancellation deactivates only after the provider confirms
//! 4. Concurrent writers never leave a user with two active rows

use std::sync::Arc;

use serde_json::json;

use subscription_sync::adapters::memory::{
    InMemoryPlanCatalog, InMemorySubscriptionLedger, InMemoryWebhookEventRepository,
};
use subscription_sync::adapters::stripe::MockPaymentGateway;
use subscription_sync::application::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CheckoutUrls,
    HandleProviderWebhookCommand, HandleProviderWebhookHandler, HandleProviderWebhookResult,
    RequestPlanChangeCommand, RequestPlanChangeHandler, RequestPlanChangeResult, UserLocks,
};
use subscription_sync::domain::foundation::{PlanId, UserId};
use subscription_sync::domain::subscription::{Plan, SubscriptionError, WebhookError};
use subscription_sync::ports::{
    EventOutcome, GatewayError, SubscriptionLedger, WebhookEventRepository, WebhookResult,
};

// =============================================================================
// Test Infrastructure
// =============================================================================

struct Harness {
    plans: Arc<InMemoryPlanCatalog>,
    ledger: Arc<InMemorySubscriptionLedger>,
    events: Arc<InMemoryWebhookEventRepository>,
    gateway: Arc<MockPaymentGateway>,
    locks: Arc<UserLocks>,
}

impl Harness {
    fn new() -> Self {
        let plans = vec![
            plan("basic", "price_basic", 1000),
            plan("pro", "price_pro", 2500),
            plan("team", "price_team", 9900),
        ];

        Self {
            plans: Arc::new(InMemoryPlanCatalog::new(plans)),
            ledger: Arc::new(InMemorySubscriptionLedger::new()),
            events: Arc::new(InMemoryWebhookEventRepository::new()),
            gateway: Arc::new(MockPaymentGateway::new()),
            locks: Arc::new(UserLocks::new()),
        }
    }

    fn plan_change(&self) -> RequestPlanChangeHandler {
        RequestPlanChangeHandler::new(
            self.plans.clone(),
            self.ledger.clone(),
            self.gateway.clone(),
            self.locks.clone(),
            CheckoutUrls {
                success_url: "https://app.example.com/billing/success".to_string(),
                cancel_url: "https://app.example.com/billing".to_string(),
            },
        )
    }

    fn cancel(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.ledger.clone(), self.gateway.clone(), self.locks.clone())
    }

    fn webhooks(&self) -> HandleProviderWebhookHandler {
        HandleProviderWebhookHandler::new(
            self.gateway.clone(),
            self.events.clone(),
            self.plans.clone(),
            self.ledger.clone(),
            self.locks.clone(),
        )
    }

    async fn deliver(
        &self,
        event_id: &str,
        event_type: &str,
        object: serde_json::Value,
    ) -> Result<HandleProviderWebhookResult, WebhookError> {
        let payload = event(event_id, event_type, object);
        self.webhooks()
            .handle(HandleProviderWebhookCommand {
                signature: self.gateway.sign(&payload),
                payload: payload.into_bytes(),
            })
            .await
    }

    /// Completes checkout for `user` on `plan`: the provider now holds the
    /// subscription and the created webhook has been applied.
    async fn purchase(&self, user: &str, plan: &str, sub_id: &str) {
        self.gateway.add_subscription(MockPaymentGateway::active_subscription(
            sub_id,
            &format!("price_{}", plan),
        ));
        let result = self
            .deliver(
                &format!("evt_created_{}", sub_id),
                "customer.subscription.created",
                subscription_object(sub_id, "active", user, plan),
            )
            .await
            .unwrap();
        assert_eq!(result.result, WebhookResult::Processed);
    }
}

fn plan(id: &str, price_id: &str, price: i64) -> Plan {
    Plan::new(PlanId::new(id).unwrap(), id.to_uppercase(), price_id, price).unwrap()
}

fn user_id(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

fn change_to(user: &str, plan: &str) -> RequestPlanChangeCommand {
    RequestPlanChangeCommand {
        user_id: user_id(user),
        email: format!("{}@example.com", user),
        name: "Test User".to_string(),
        plan_id: PlanId::new(plan).unwrap(),
    }
}

fn subscription_object(sub_id: &str, status: &str, user: &str, plan: &str) -> serde_json::Value {
    json!({
        "id": sub_id,
        "object": "subscription",
        "status": status,
        "current_period_end": 1_800_000_000,
        "metadata": { "user_id": user, "plan_id": plan }
    })
}

fn event(event_id: &str, event_type: &str, object: serde_json::Value) -> String {
    json!({
        "id": event_id,
        "type": event_type,
        "created": 1_700_000_000,
        "livemode": false,
        "data": { "object": object }
    })
    .to_string()
}

// =============================================================================
// First Purchase (checkout, then webhook)
// =============================================================================

#[tokio::test]
async fn first_purchase_returns_checkout_and_writes_nothing_until_webhook() {
    let h = Harness::new();

    let result = h.plan_change().handle(change_to("user-1", "basic")).await.unwrap();

    let RequestPlanChangeResult::CheckoutRequired { checkout_url, .. } = result else {
        panic!("expected checkout for a user without a subscription");
    };
    assert!(checkout_url.starts_with("https://"));
    assert!(h.ledger.snapshot().await.is_empty());

    let request = &h.gateway.checkout_requests()[0];
    assert_eq!(request.price_id, "price_basic");
    assert_eq!(request.metadata.get("user_id").map(String::as_str), Some("user-1"));
    assert_eq!(request.metadata.get("plan_id").map(String::as_str), Some("basic"));

    h.purchase("user-1", "basic", "sub_1").await;

    let active = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();
    assert_eq!(active.plan_id.as_str(), "basic");
    assert_eq!(active.provider_subscription_id, "sub_1");
    assert_eq!(h.ledger.snapshot().await.len(), 1);
}

#[tokio::test]
async fn redelivered_created_event_is_applied_once() {
    let h = Harness::new();
    let object = subscription_object("sub_1", "active", "user-1", "basic");

    let first = h
        .deliver("evt_1", "customer.subscription.created", object.clone())
        .await
        .unwrap();
    let second = h
        .deliver("evt_1", "customer.subscription.created", object)
        .await
        .unwrap();

    assert_eq!(first.result, WebhookResult::Processed);
    assert_eq!(second.result, WebhookResult::AlreadyProcessed);
    assert_eq!(h.ledger.snapshot().await.len(), 1);
    assert_eq!(h.events.len().await, 1);
}

#[tokio::test]
async fn updated_before_created_still_yields_one_active_row() {
    let h = Harness::new();
    let object = subscription_object("sub_1", "active", "user-1", "basic");

    h.deliver("evt_upd", "customer.subscription.updated", object.clone())
        .await
        .unwrap();
    let late_created = h
        .deliver("evt_new", "customer.subscription.created", object)
        .await
        .unwrap();

    assert_eq!(late_created.result, WebhookResult::Processed);
    assert_eq!(h.ledger.active_count().await, 1);
    let record = h.events.find_by_event_id("evt_new").await.unwrap().unwrap();
    assert_eq!(record.outcome, EventOutcome::Ignored);
}

#[tokio::test]
async fn created_event_for_unknown_plan_is_rejected_and_can_be_redelivered() {
    let h = Harness::new();

    let err = h
        .deliver(
            "evt_1",
            "customer.subscription.created",
            subscription_object("sub_1", "active", "user-1", "platinum"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, WebhookError::UnknownPlan(_)));
    assert!(h.ledger.snapshot().await.is_empty());
    assert!(h.events.is_empty().await);
}

// =============================================================================
// Plan Change (in place)
// =============================================================================

#[tokio::test]
async fn upgrade_swaps_active_row_in_one_step() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    let before = h.ledger.snapshot().await;

    let result = h.plan_change().handle(change_to("user-1", "pro")).await.unwrap();

    let RequestPlanChangeResult::Updated { previous, current } = result else {
        panic!("expected in-place update");
    };
    let after = h.ledger.snapshot().await;
    assert_eq!(after.len(), before.len() + 1);
    assert_eq!(h.ledger.active_count().await, 1);
    assert!(!after.iter().find(|r| r.id == previous.id).unwrap().is_active);
    assert!(after.iter().find(|r| r.id == current.id).unwrap().is_active);
    assert_eq!(current.plan_id.as_str(), "pro");
    assert_eq!(current.provider_subscription_id, "sub_1");
    assert!(!h.gateway.was_called("create_checkout_session"));
}

#[tokio::test]
async fn failed_upgrade_changes_nothing() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    let before = h.ledger.snapshot().await;
    h.gateway.set_method_error(
        "modify_subscription",
        GatewayError::invalid_request("No such price"),
    );

    let err = h.plan_change().handle(change_to("user-1", "pro")).await.unwrap_err();

    assert!(matches!(err, SubscriptionError::Gateway { .. }));
    assert_eq!(h.ledger.snapshot().await, before);
}

#[tokio::test]
async fn updated_webhook_after_upgrade_touches_the_new_row() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    h.plan_change().handle(change_to("user-1", "pro")).await.unwrap();

    // Provider echoes the change; metadata still names the original plan.
    h.deliver(
        "evt_upd",
        "customer.subscription.updated",
        json!({
            "id": "sub_1",
            "status": "active",
            "current_period_end": 1_900_000_000,
            "metadata": { "user_id": "user-1", "plan_id": "basic" }
        }),
    )
    .await
    .unwrap();

    let active = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();
    assert_eq!(active.plan_id.as_str(), "pro");
    assert_eq!(active.period_end.as_datetime().timestamp(), 1_900_000_000);
    assert_eq!(h.ledger.active_count().await, 1);
}

#[tokio::test]
async fn price_change_made_at_provider_is_picked_up_from_updated_webhook() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;

    // The provider moved the subscription to the team price, but the ledger
    // never heard about it from a plan change.
    h.deliver(
        "evt_upd",
        "customer.subscription.updated",
        json!({
            "id": "sub_1",
            "status": "active",
            "current_period_end": 1_900_000_000,
            "items": { "data": [ { "id": "si_sub_1", "price": { "id": "price_team" } } ] },
            "metadata": { "user_id": "user-1", "plan_id": "basic" }
        }),
    )
    .await
    .unwrap();

    let active = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();
    assert_eq!(active.plan_id.as_str(), "team");
    assert_eq!(active.provider_subscription_id, "sub_1");
    assert_eq!(h.ledger.active_count().await, 1);

    let result = h.plan_change().handle(change_to("user-1", "team")).await;
    assert!(matches!(result, Err(SubscriptionError::ValidationFailed { .. })));
}

#[tokio::test]
async fn provider_side_cancellation_sends_next_change_to_checkout() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;

    h.deliver(
        "evt_cancel",
        "customer.subscription.updated",
        subscription_object("sub_1", "canceled", "user-1", "basic"),
    )
    .await
    .unwrap();
    assert_eq!(h.ledger.active_count().await, 0);

    let result = h.plan_change().handle(change_to("user-1", "pro")).await.unwrap();
    assert!(matches!(result, RequestPlanChangeResult::CheckoutRequired { .. }));
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn cancellation_deactivates_after_provider_confirms() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    let row = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();

    let result = h
        .cancel()
        .handle(CancelSubscriptionCommand {
            user_id: user_id("user-1"),
            subscription_id: row.id,
        })
        .await
        .unwrap();

    assert!(!result.subscription.is_active);
    assert_eq!(h.ledger.active_count().await, 0);
    assert!(h.gateway.subscription("sub_1").unwrap().is_terminal());
}

#[tokio::test]
async fn rate_limited_cancellation_leaves_row_active() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    let row = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();
    h.gateway.set_method_error(
        "cancel_subscription",
        GatewayError::rate_limited("Too many requests"),
    );

    let err = h
        .cancel()
        .handle(CancelSubscriptionCommand {
            user_id: user_id("user-1"),
            subscription_id: row.id,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SubscriptionError::RateLimited { .. }));
    assert_eq!(h.ledger.snapshot().await, vec![row]);
}

#[tokio::test]
async fn cancelling_someone_elses_subscription_is_not_found() {
    let h = Harness::new();
    h.purchase("user-1", "basic", "sub_1").await;
    let row = h.ledger.find_active_for_user(&user_id("user-1")).await.unwrap().unwrap();

    let err = h
        .cancel()
        .handle(CancelSubscriptionCommand {
            user_id: user_id("intruder"),
            subscription_id: row.id,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SubscriptionError::SubscriptionNotFound(_)));
    assert_eq!(h.ledger.active_count().await, 1);
    assert!(!h.gateway.was_called("cancel_subscription"));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_created_events_leave_one_active_row() {
    let h = Arc::new(Harness::new());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                h.deliver(
                    &format!("evt_{}", i),
                    "customer.subscription.created",
                    subscription_object(&format!("sub_{}", i), "active", "user-1", "basic"),
                )
                .await
            })
        })
        .collect();

    let mut applied = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => applied += 1,
            Err(err) => assert!(matches!(err, WebhookError::Conflict(_)), "got {:?}", err),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(h.ledger.active_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_lock_registries_still_cannot_double_activate() {
    // Two processes share the ledger but not the lock registry.
    let h = Harness::new();
    let other = HandleProviderWebhookHandler::new(
        h.gateway.clone(),
        h.events.clone(),
        h.plans.clone(),
        h.ledger.clone(),
        Arc::new(UserLocks::new()),
    );

    let first_payload = event(
        "evt_a",
        "customer.subscription.created",
        subscription_object("sub_a", "active", "user-1", "basic"),
    );
    let second_payload = event(
        "evt_b",
        "customer.subscription.created",
        subscription_object("sub_b", "active", "user-1", "pro"),
    );
    let first_cmd = HandleProviderWebhookCommand {
        signature: h.gateway.sign(&first_payload),
        payload: first_payload.into_bytes(),
    };
    let second_cmd = HandleProviderWebhookCommand {
        signature: h.gateway.sign(&second_payload),
        payload: second_payload.into_bytes(),
    };

    let ours = h.webhooks();
    let (first, second) = tokio::join!(ours.handle(first_cmd), other.handle(second_cmd));

    assert_eq!(first.is_ok() as u8 + second.is_ok() as u8, 1);
    assert_eq!(h.ledger.active_count().await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_plan_changes_keep_one_active_row() {
    let h = Arc::new(Harness::new());
    h.purchase("user-1", "basic", "sub_1").await;

    let tasks: Vec<_> = ["pro", "team", "pro", "team"]
        .into_iter()
        .map(|plan| {
            let h = h.clone();
            tokio::spawn(async move { h.plan_change().handle(change_to("user-1", plan)).await })
        })
        .collect();

    for task in tasks {
        match task.await.unwrap() {
            Ok(RequestPlanChangeResult::Updated { .. }) => {}
            // Asking for the plan already active is rejected
            Err(SubscriptionError::ValidationFailed { .. }) => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(h.ledger.active_count().await, 1);
    assert!(!h.gateway.was_called("create_checkout_session"));
}
