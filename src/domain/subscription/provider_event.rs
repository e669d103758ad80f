//! Provider webhook events.
//!
//! `ProviderEvent` is the authenticated envelope as delivered. Before any
//! ledger effect is applied it is narrowed into a `SubscriptionEvent`, with
//! every field the effect needs checked for presence up front.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PlanId, Timestamp, UserId};
use crate::domain::subscription::WebhookError;

/// Metadata key carrying the subscribing user.
pub const METADATA_USER_ID: &str = "user_id";

/// Metadata key carrying the purchased plan.
pub const METADATA_PLAN_ID: &str = "plan_id";

/// Provider subscription statuses after which the subscription never bills again.
const TERMINAL_STATUSES: &[&str] = &["canceled", "incomplete_expired"];

/// Returns true if a provider subscription in `status` will never bill again.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Webhook event envelope (simplified).
///
/// Only fields relevant to subscription sync are captured.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEvent {
    /// Unique identifier for the event (evt_xxx format).
    pub id: String,

    /// Type of event (e.g., "customer.subscription.created").
    #[serde(rename = "type")]
    pub event_type: String,

    /// Time at which the event was created (Unix timestamp).
    #[serde(default)]
    pub created: i64,

    /// Object containing event-specific data.
    pub data: ProviderEventData,

    #[serde(default)]
    pub livemode: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Container for event-specific data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderEventData {
    /// The object that triggered the event.
    pub object: serde_json::Value,
}

impl ProviderEvent {
    /// Parse the event type into a known enum variant.
    pub fn parsed_type(&self) -> ProviderEventType {
        ProviderEventType::parse(&self.event_type)
    }
}

/// Event types that change the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderEventType {
    SubscriptionCreated,
    SubscriptionUpdated,
    Unknown,
}

impl ProviderEventType {
    /// Parse event type from string.
    ///
    /// Stripe's `customer.` prefixed names are accepted alongside the bare ones.
    pub fn parse(s: &str) -> Self {
        match s {
            "subscription.created" | "customer.subscription.created" => Self::SubscriptionCreated,
            "subscription.updated" | "customer.subscription.updated" => Self::SubscriptionUpdated,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionCreated => "subscription.created",
            Self::SubscriptionUpdated => "subscription.updated",
            Self::Unknown => "unknown",
        }
    }
}

/// Provider subscription object as echoed in a lifecycle event.
#[derive(Debug, Clone, Default, Deserialize)]
struct SubscriptionObject {
    id: Option<String>,
    status: Option<String>,
    current_period_end: Option<i64>,
    #[serde(default)]
    items: Option<SubscriptionObjectItems>,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SubscriptionObjectItems {
    #[serde(default)]
    data: Vec<SubscriptionObjectItem>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SubscriptionObjectItem {
    current_period_end: Option<i64>,
    price: Option<SubscriptionObjectPrice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SubscriptionObjectPrice {
    id: Option<String>,
}

impl SubscriptionObject {
    /// Newer API versions report the period end per item only.
    fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .as_ref()
                .and_then(|items| items.data.first())
                .and_then(|item| item.current_period_end)
        })
    }

    /// Price of the first item, which is the one plan changes swap.
    fn price_id(&self) -> Option<String> {
        self.items
            .as_ref()
            .and_then(|items| items.data.first())
            .and_then(|item| item.price.as_ref())
            .and_then(|price| price.id.clone())
            .filter(|id| !id.is_empty())
    }
}

/// State of a provider subscription carried by a lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub provider_subscription_id: String,
    pub period_end: Timestamp,
    pub status: Option<String>,
    /// Provider price currently billed, when the event lists the items.
    pub price_id: Option<String>,
}

impl SubscriptionSnapshot {
    /// Returns true if the provider will never bill this subscription again.
    pub fn is_terminal(&self) -> bool {
        self.status.as_deref().is_some_and(is_terminal_status)
    }
}

/// A subscription was created, typically by a completed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionCreated {
    pub snapshot: SubscriptionSnapshot,
    pub user_id: UserId,
    pub plan_id: PlanId,
}

/// A subscription changed at the provider.
///
/// `plan_id` is whatever was attached at checkout. After an in-place plan
/// change it no longer names the current plan, so it is only used when no
/// ledger row exists yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdated {
    pub snapshot: SubscriptionSnapshot,
    pub user_id: UserId,
    pub plan_id: Option<PlanId>,
}

/// Validated, typed view of a webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    Created(SubscriptionCreated),
    Updated(SubscriptionUpdated),
    Ignored { event_type: String },
}

impl SubscriptionEvent {
    /// Narrows an envelope into a typed event.
    ///
    /// # Errors
    ///
    /// - `MissingField` if the subscription object lacks its id or period end
    /// - `MissingMetadata` if a required metadata key is absent
    /// - `ParseError` if the object or a metadata value is malformed
    pub fn from_provider_event(event: &ProviderEvent) -> Result<Self, WebhookError> {
        let kind = event.parsed_type();
        if kind == ProviderEventType::Unknown {
            return Ok(SubscriptionEvent::Ignored {
                event_type: event.event_type.clone(),
            });
        }

        let object: SubscriptionObject = serde_json::from_value(event.data.object.clone())
            .map_err(|e| WebhookError::ParseError(format!("subscription object: {}", e)))?;
        let snapshot = snapshot_of(&object)?;
        let user_id = required_user_id(&object.metadata)?;

        match kind {
            ProviderEventType::SubscriptionCreated => {
                let plan_id = optional_plan_id(&object.metadata)?
                    .ok_or(WebhookError::MissingMetadata(METADATA_PLAN_ID))?;
                Ok(SubscriptionEvent::Created(SubscriptionCreated {
                    snapshot,
                    user_id,
                    plan_id,
                }))
            }
            ProviderEventType::SubscriptionUpdated => {
                Ok(SubscriptionEvent::Updated(SubscriptionUpdated {
                    snapshot,
                    user_id,
                    plan_id: optional_plan_id(&object.metadata)?,
                }))
            }
            ProviderEventType::Unknown => Ok(SubscriptionEvent::Ignored {
                event_type: event.event_type.clone(),
            }),
        }
    }
}

fn snapshot_of(object: &SubscriptionObject) -> Result<SubscriptionSnapshot, WebhookError> {
    let provider_subscription_id = object
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(WebhookError::MissingField("id"))?;
    let period_end = object
        .period_end()
        .ok_or(WebhookError::MissingField("current_period_end"))?;
    let period_end = Timestamp::from_unix_secs(period_end).ok_or_else(|| {
        WebhookError::ParseError(format!("current_period_end out of range: {}", period_end))
    })?;

    Ok(SubscriptionSnapshot {
        provider_subscription_id,
        period_end,
        status: object.status.clone(),
        price_id: object.price_id(),
    })
}

fn required_user_id(metadata: &HashMap<String, String>) -> Result<UserId, WebhookError> {
    let raw = metadata
        .get(METADATA_USER_ID)
        .ok_or(WebhookError::MissingMetadata(METADATA_USER_ID))?;
    UserId::new(raw.as_str()).map_err(|e| WebhookError::ParseError(e.to_string()))
}

fn optional_plan_id(metadata: &HashMap<String, String>) -> Result<Option<PlanId>, WebhookError> {
    metadata
        .get(METADATA_PLAN_ID)
        .map(|raw| PlanId::new(raw.as_str()).map_err(|e| WebhookError::ParseError(e.to_string())))
        .transpose()
}
