//! Webhook processor - Orchestrates idempotent webhook event handling.
//!
//! ## Design
//!
//! The processor follows these steps:
//! 1. Check if the event id was already processed
//! 2. Narrow the envelope into a typed event and dispatch it
//! 3. Record successful and ignored outcomes
//!
//! Failed deliveries are not recorded, so the provider's redelivery gets a
//! fresh attempt instead of a stale "already processed".
//!
//! ## Race Condition Handling
//!
//! When duplicate deliveries arrive simultaneously:
//! - Handlers coalesce effects that are already in the ledger
//! - First to save wins (PRIMARY KEY on the event id)
//! - Others get `AlreadyExists` and return `AlreadyProcessed`

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::subscription::{
    ProviderEvent, ProviderEventType, SubscriptionEvent, WebhookError,
};
use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository, WebhookResult};

/// Handler for one kind of typed subscription event.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    /// Applies the event to the ledger.
    ///
    /// Returns `Err(WebhookError::Ignored(_))` if the event should be
    /// acknowledged without an effect.
    async fn handle(&self, event: &SubscriptionEvent) -> Result<(), WebhookError>;
}

/// Routes typed events to their handler.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Find a handler for the given event type.
    fn get_handler(&self, event_type: &ProviderEventType) -> Option<&dyn WebhookEventHandler>;

    /// Narrow and dispatch an event.
    ///
    /// Unknown event types and types without a registered handler come back
    /// as `Err(WebhookError::Ignored)`.
    async fn dispatch(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let typed = SubscriptionEvent::from_provider_event(event)?;
        if let SubscriptionEvent::Ignored { event_type } = &typed {
            return Err(WebhookError::Ignored(format!(
                "Unhandled event type: {}",
                event_type
            )));
        }

        let event_type = event.parsed_type();
        match self.get_handler(&event_type) {
            Some(handler) => handler.handle(&typed).await,
            None => Err(WebhookError::Ignored(format!(
                "No handler for event type: {}",
                event_type.as_str()
            ))),
        }
    }
}

/// Processes webhook events with idempotency guarantees.
pub struct IdempotentWebhookProcessor<R, D>
where
    R: WebhookEventRepository + ?Sized,
    D: WebhookDispatcher + ?Sized,
{
    repository: Arc<R>,
    dispatcher: Arc<D>,
}

impl<R, D> IdempotentWebhookProcessor<R, D>
where
    R: WebhookEventRepository + ?Sized,
    D: WebhookDispatcher + ?Sized,
{
    pub fn new(repository: Arc<R>, dispatcher: Arc<D>) -> Self {
        Self {
            repository,
            dispatcher,
        }
    }

    /// Process a webhook event at most once.
    ///
    /// # Returns
    ///
    /// - `Ok(WebhookResult::Processed)` - effect applied, or event acknowledged as ignored
    /// - `Ok(WebhookResult::AlreadyProcessed)` - event id seen before, nothing applied
    /// - `Err(_)` - processing failed and was not recorded
    pub async fn process(&self, event: &ProviderEvent) -> Result<WebhookResult, WebhookError> {
        // 1. Check if already processed
        if self.repository.find_by_event_id(&event.id).await?.is_some() {
            tracing::debug!(event_id = %event.id, "Webhook event already processed");
            return Ok(WebhookResult::AlreadyProcessed);
        }

        // 2. Process the event
        let result = self.dispatcher.dispatch(event).await;

        // 3. Build the record; failures propagate unrecorded
        let payload = serde_json::to_value(event)
            .map_err(|e| WebhookError::ParseError(format!("Failed to serialize event: {}", e)))?;
        let record = match result {
            Ok(()) => WebhookEventRecord::success(&event.id, &event.event_type, payload),
            Err(WebhookError::Ignored(reason)) => {
                tracing::info!(event_id = %event.id, event_type = %event.event_type, %reason, "Webhook event ignored");
                WebhookEventRecord::ignored(&event.id, &event.event_type, reason, payload)
            }
            Err(e) => {
                tracing::warn!(event_id = %event.id, event_type = %event.event_type, error = %e, "Webhook event failed");
                return Err(e);
            }
        };

        // 4. Save the record (handles race conditions)
        match self.repository.save(record).await? {
            SaveResult::Inserted => Ok(WebhookResult::Processed),
            SaveResult::AlreadyExists => Ok(WebhookResult::AlreadyProcessed),
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Database(err.to_string())
    }
}
