//! HTTP DTOs (Data Transfer Objects) for subscription endpoints.
//!
//! Every endpoint answers with the same envelope:
//! `{status, success, message, data?, error?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::application::handlers::subscription::{
    CancelSubscriptionResult, HandleProviderWebhookResult, RequestPlanChangeResult,
};
use crate::domain::subscription::{Plan, Subscription};
use crate::ports::WebhookResult;

// ════════════════════════════════════════════════════════════════════════════════
// Response Envelope
// ════════════════════════════════════════════════════════════════════════════════

/// Standard response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    /// HTTP status code, repeated in the body.
    pub status: u16,
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Stable error code for programmatic handling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    /// Create a successful response carrying data.
    pub fn ok(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status: status.as_u16(),
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }
}

impl ApiResponse<()> {
    /// Create a successful response without data.
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: status.as_u16(),
            success: true,
            message: message.into(),
            data: None,
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(
        status: StatusCode,
        error_code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: status.as_u16(),
            success: false,
            message: message.into(),
            data: None,
            error: Some(error_code.into()),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// A plan as listed on the packages endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub id: String,
    pub display_name: String,
    /// Price in minor currency units.
    pub price: i64,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id.to_string(),
            display_name: plan.display_name,
            price: plan.price,
        }
    }
}

/// A ledger row as seen by its owner.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub id: String,
    pub plan_id: String,
    pub provider_subscription_id: String,
    /// End of the paid period (ISO 8601).
    pub period_end: String,
    pub is_active: bool,
    /// When the row was written (ISO 8601).
    pub created_at: String,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id.to_string(),
            plan_id: sub.plan_id.to_string(),
            provider_subscription_id: sub.provider_subscription_id,
            period_end: sub.period_end.as_datetime().to_rfc3339(),
            is_active: sub.is_active,
            created_at: sub.created_at.as_datetime().to_rfc3339(),
        }
    }
}

/// Outcome of a plan change request.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PlanChangeResponse {
    /// The existing subscription now bills the new plan.
    Updated {
        previous: SubscriptionResponse,
        current: SubscriptionResponse,
    },
    /// The caller must finish hosted checkout.
    CheckoutRequired {
        checkout_url: String,
        session_id: String,
    },
}

impl From<RequestPlanChangeResult> for PlanChangeResponse {
    fn from(result: RequestPlanChangeResult) -> Self {
        match result {
            RequestPlanChangeResult::Updated { previous, current } => Self::Updated {
                previous: previous.into(),
                current: current.into(),
            },
            RequestPlanChangeResult::CheckoutRequired {
                checkout_url,
                session_id,
            } => Self::CheckoutRequired {
                checkout_url,
                session_id,
            },
        }
    }
}

/// Response for a cancellation.
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub subscription: SubscriptionResponse,
    pub provider_status: String,
}

impl From<CancelSubscriptionResult> for CancelResponse {
    fn from(result: CancelSubscriptionResult) -> Self {
        Self {
            subscription: result.subscription.into(),
            provider_status: result.provider_status,
        }
    }
}

/// Acknowledgement returned to the provider for a webhook delivery.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAckResponse {
    pub event_id: String,
    pub event_type: String,
    /// True when this delivery was a redelivery of an applied event.
    pub duplicate: bool,
}

impl From<HandleProviderWebhookResult> for WebhookAckResponse {
    fn from(result: HandleProviderWebhookResult) -> Self {
        Self {
            event_id: result.event_id,
            event_type: result.event_type,
            duplicate: result.result == WebhookResult::AlreadyProcessed,
        }
    }
}
