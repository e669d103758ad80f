//! HandleProviderWebhookHandler - Command handler for provider webhook deliveries.

use std::sync::Arc;

use crate::application::UserLocks;
use crate::domain::subscription::{IdempotentWebhookProcessor, WebhookError};
use crate::ports::{
    PaymentGateway, PlanCatalog, SubscriptionLedger, WebhookEventRepository, WebhookResult,
};

use super::webhook_handlers::{
    SubscriptionCreatedHandler, SubscriptionEventDispatcher, SubscriptionUpdatedHandler,
};

/// Command to handle a payment webhook.
#[derive(Debug, Clone)]
pub struct HandleProviderWebhookCommand {
    /// Raw webhook payload, exactly as received.
    pub payload: Vec<u8>,
    /// Stripe-Signature header.
    pub signature: String,
}

/// Result of webhook processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleProviderWebhookResult {
    pub event_id: String,
    pub event_type: String,
    pub result: WebhookResult,
}

/// Handler for processing provider webhooks.
///
/// Verifies the signature before reading anything from the payload, then
/// hands the event to the idempotent processor.
pub struct HandleProviderWebhookHandler {
    gateway: Arc<dyn PaymentGateway>,
    processor: IdempotentWebhookProcessor<dyn WebhookEventRepository, SubscriptionEventDispatcher>,
}

impl HandleProviderWebhookHandler {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        events: Arc<dyn WebhookEventRepository>,
        plans: Arc<dyn PlanCatalog>,
        ledger: Arc<dyn SubscriptionLedger>,
        locks: Arc<UserLocks>,
    ) -> Self {
        let dispatcher = SubscriptionEventDispatcher::new(
            SubscriptionCreatedHandler::new(plans.clone(), ledger.clone(), locks.clone()),
            SubscriptionUpdatedHandler::new(plans, ledger, locks),
        );

        Self {
            gateway,
            processor: IdempotentWebhookProcessor::new(events, Arc::new(dispatcher)),
        }
    }

    pub async fn handle(
        &self,
        cmd: HandleProviderWebhookCommand,
    ) -> Result<HandleProviderWebhookResult, WebhookError> {
        // 1. Verify webhook signature and parse event
        let event = self
            .gateway
            .verify_webhook(&cmd.payload, &cmd.signature)
            .await?;

        // 2. Apply at most once
        let result = self.processor.process(&event).await?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event.event_type,
            result = ?result,
            "Webhook handled"
        );

        Ok(HandleProviderWebhookResult {
            event_id: event.id,
            event_type: event.event_type,
            result,
        })
    }
}
