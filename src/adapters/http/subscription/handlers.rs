//! HTTP handlers for subscription endpoints.
//!
//! These handlers connect Axum routes to application layer command/query handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::handlers::subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CheckoutUrls, GetPlanHandler,
    GetPlanQuery, GetSubscriptionHandler, GetSubscriptionQuery, HandleProviderWebhookCommand,
    HandleProviderWebhookHandler, ListPlansHandler, ListPlansQuery, ListSubscriptionsHandler,
    ListSubscriptionsQuery, RequestPlanChangeCommand, RequestPlanChangeHandler,
};
use crate::application::UserLocks;
use crate::domain::foundation::{PlanId, SubscriptionId, UserId};
use crate::domain::subscription::{GatewayFailure, SubscriptionError, WebhookError};
use crate::ports::{PaymentGateway, PlanCatalog, SubscriptionLedger, WebhookEventRepository};

use super::dto::{
    ApiResponse, CancelResponse, PlanChangeResponse, PlanResponse, SubscriptionResponse,
    WebhookAckResponse,
};

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all dependencies.
///
/// Cloned for each request; every dependency is behind an `Arc`. The lock
/// registry is shared so that plan changes and webhook effects for one user
/// never interleave inside this process.
#[derive(Clone)]
pub struct SubscriptionAppState {
    pub plan_catalog: Arc<dyn PlanCatalog>,
    pub ledger: Arc<dyn SubscriptionLedger>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub user_locks: Arc<UserLocks>,
    pub checkout_urls: CheckoutUrls,
}

impl SubscriptionAppState {
    /// Create handlers on demand from the shared state.
    pub fn list_plans_handler(&self) -> ListPlansHandler {
        ListPlansHandler::new(self.plan_catalog.clone())
    }

    pub fn get_plan_handler(&self) -> GetPlanHandler {
        GetPlanHandler::new(self.plan_catalog.clone())
    }

    pub fn list_subscriptions_handler(&self) -> ListSubscriptionsHandler {
        ListSubscriptionsHandler::new(self.ledger.clone())
    }

    pub fn get_subscription_handler(&self) -> GetSubscriptionHandler {
        GetSubscriptionHandler::new(self.ledger.clone())
    }

    pub fn request_plan_change_handler(&self) -> RequestPlanChangeHandler {
        RequestPlanChangeHandler::new(
            self.plan_catalog.clone(),
            self.ledger.clone(),
            self.payment_gateway.clone(),
            self.user_locks.clone(),
            self.checkout_urls.clone(),
        )
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(
            self.ledger.clone(),
            self.payment_gateway.clone(),
            self.user_locks.clone(),
        )
    }

    pub fn webhook_handler(&self) -> HandleProviderWebhookHandler {
        HandleProviderWebhookHandler::new(
            self.payment_gateway.clone(),
            self.webhook_events.clone(),
            self.plan_catalog.clone(),
            self.ledger.clone(),
            self.user_locks.clone(),
        )
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context (set by the upstream auth proxy)
// ════════════════════════════════════════════════════════════════════════════════

/// Authenticated user context extracted from request.
///
/// Authentication happens upstream; the proxy forwards the caller's identity
/// in `X-User-Id`, `X-User-Email` and `X-User-Name`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
    pub email: String,
    pub name: String,
}

/// Rejection type for AuthenticatedUser extraction.
pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> Response {
        ApiResponse::error(
            StatusCode::UNAUTHORIZED,
            "AUTHENTICATION_REQUIRED",
            "Authentication is required",
        )
        .into_response()
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl<S> axum::extract::FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    fn from_request_parts<'life0, 'life1, 'async_trait>(
        parts: &'life0 mut axum::http::request::Parts,
        _state: &'life1 S,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self, Self::Rejection>> + Send + 'async_trait>,
    >
    where
        'life0: 'async_trait,
        'life1: 'async_trait,
        Self: 'async_trait,
    {
        Box::pin(async move {
            let user_id = header_value(&parts.headers, "X-User-Id")
                .and_then(|s| UserId::new(s).ok())
                .ok_or(AuthenticationRequired)?;
            let email =
                header_value(&parts.headers, "X-User-Email").ok_or(AuthenticationRequired)?;
            let name = header_value(&parts.headers, "X-User-Name").unwrap_or_default();

            Ok(AuthenticatedUser {
                user_id,
                email,
                name,
            })
        })
    }
}

fn parse_subscription_id(raw: &str) -> Result<SubscriptionId, SubscriptionError> {
    raw.parse()
        .map_err(|_| SubscriptionError::validation("subscription_id", "Not a valid subscription id"))
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /health - Liveness check
pub async fn health_check() -> impl IntoResponse {
    ApiResponse::message(StatusCode::OK, "ok")
}

/// GET /packages - List purchasable plans
pub async fn list_plans(
    State(state): State<SubscriptionAppState>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let plans = state.list_plans_handler().handle(ListPlansQuery).await?;

    let data: Vec<PlanResponse> = plans.into_iter().map(PlanResponse::from).collect();
    Ok(ApiResponse::ok(StatusCode::OK, "Plans fetched", data))
}

/// GET /packages/:plan_id - Get one plan
pub async fn get_plan(
    State(state): State<SubscriptionAppState>,
    Path(plan_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = GetPlanQuery {
        plan_id: PlanId::new(plan_id)?,
    };

    let plan = state.get_plan_handler().handle(query).await?;

    Ok(ApiResponse::ok(
        StatusCode::OK,
        "Plan fetched",
        PlanResponse::from(plan),
    ))
}

/// GET /subscription - List the caller's subscriptions, newest first
pub async fn list_subscriptions(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = ListSubscriptionsQuery {
        user_id: user.user_id,
    };

    let subscriptions = state.list_subscriptions_handler().handle(query).await?;

    let data: Vec<SubscriptionResponse> = subscriptions
        .into_iter()
        .map(SubscriptionResponse::from)
        .collect();
    Ok(ApiResponse::ok(StatusCode::OK, "Subscriptions fetched", data))
}

/// GET /subscription/:subscription_id - Get one of the caller's subscriptions
pub async fn get_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Path(subscription_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let query = GetSubscriptionQuery {
        user_id: user.user_id,
        subscription_id: parse_subscription_id(&subscription_id)?,
    };

    let subscription = state.get_subscription_handler().handle(query).await?;

    Ok(ApiResponse::ok(
        StatusCode::OK,
        "Subscription fetched",
        SubscriptionResponse::from(subscription),
    ))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /subscription/:plan_id/checkout - Move the caller to a plan
///
/// Changes the live subscription in place when there is one, otherwise
/// returns a hosted checkout URL.
pub async fn request_plan_change(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Path(plan_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let cmd = RequestPlanChangeCommand {
        user_id: user.user_id,
        email: user.email,
        name: user.name,
        plan_id: PlanId::new(plan_id)?,
    };

    let result = state.request_plan_change_handler().handle(cmd).await?;
    let response = PlanChangeResponse::from(result);

    let message = match &response {
        PlanChangeResponse::Updated { .. } => "Subscription updated",
        PlanChangeResponse::CheckoutRequired { .. } => "Checkout session created",
    };
    Ok(ApiResponse::ok(StatusCode::OK, message, response))
}

/// POST /cancel_subscription/:subscription_id - Cancel one of the caller's subscriptions
pub async fn cancel_subscription(
    State(state): State<SubscriptionAppState>,
    user: AuthenticatedUser,
    Path(subscription_id): Path<String>,
) -> Result<impl IntoResponse, SubscriptionApiError> {
    let cmd = CancelSubscriptionCommand {
        user_id: user.user_id,
        subscription_id: parse_subscription_id(&subscription_id)?,
    };

    let result = state.cancel_subscription_handler().handle(cmd).await?;

    Ok(ApiResponse::ok(
        StatusCode::OK,
        "Subscription cancelled",
        CancelResponse::from(result),
    ))
}

/// POST /webhook - Handle payment provider webhook events
///
/// The body is passed on untouched; the signature covers the raw bytes.
pub async fn handle_webhook(
    State(state): State<SubscriptionAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::InvalidSignature)?;

    let cmd = HandleProviderWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    match state.webhook_handler().handle(cmd).await {
        Ok(result) => Ok(ApiResponse::ok(
            StatusCode::OK,
            "Webhook processed",
            WebhookAckResponse::from(result),
        )
        .into_response()),
        Err(WebhookError::Ignored(reason)) => {
            tracing::debug!(reason = %reason, "Webhook ignored");
            Ok(ApiResponse::message(StatusCode::OK, format!("Webhook ignored: {}", reason))
                .into_response())
        }
        Err(err) => Err(err.into()),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts domain errors to HTTP responses.
#[derive(Debug)]
pub struct SubscriptionApiError(SubscriptionError);

impl From<SubscriptionError> for SubscriptionApiError {
    fn from(err: SubscriptionError) -> Self {
        Self(err)
    }
}

impl From<crate::domain::foundation::ValidationError> for SubscriptionApiError {
    fn from(err: crate::domain::foundation::ValidationError) -> Self {
        Self(SubscriptionError::from(err))
    }
}

impl SubscriptionApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            SubscriptionError::PlanNotFound(_) | SubscriptionError::SubscriptionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SubscriptionError::ValidationFailed { .. } => StatusCode::BAD_REQUEST,
            SubscriptionError::Gateway { failure, .. } => match failure {
                GatewayFailure::Rejected => StatusCode::BAD_REQUEST,
                GatewayFailure::Unavailable => StatusCode::BAD_GATEWAY,
                GatewayFailure::OutcomeUnknown => StatusCode::GATEWAY_TIMEOUT,
            },
            SubscriptionError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SubscriptionError::Conflict { .. } => StatusCode::CONFLICT,
            SubscriptionError::Infrastructure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SubscriptionApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        }

        ApiResponse::error(status, self.0.code().to_string(), self.0.message()).into_response()
    }
}

/// API error type for webhook deliveries.
///
/// The status code tells the provider whether to redeliver.
#[derive(Debug)]
pub struct WebhookApiError(WebhookError);

impl From<WebhookError> for WebhookApiError {
    fn from(err: WebhookError) -> Self {
        Self(err)
    }
}

fn webhook_error_code(err: &WebhookError) -> &'static str {
    match err {
        WebhookError::InvalidSignature => "INVALID_WEBHOOK_SIGNATURE",
        WebhookError::TimestampOutOfRange => "WEBHOOK_TIMESTAMP_OUT_OF_RANGE",
        WebhookError::InvalidTimestamp => "INVALID_WEBHOOK_TIMESTAMP",
        WebhookError::ParseError(_) => "INVALID_WEBHOOK_PAYLOAD",
        WebhookError::MissingMetadata(_) | WebhookError::MissingField(_) => "VALIDATION_FAILED",
        WebhookError::UnknownPlan(_) => "PLAN_NOT_FOUND",
        WebhookError::Conflict(_) => "ACTIVE_SUBSCRIPTION_CONFLICT",
        WebhookError::Ignored(_) => "IGNORED",
        WebhookError::Database(_) => "DATABASE_ERROR",
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if self.0.is_authenticity_failure() {
            tracing::warn!(error = %self.0, "Webhook authentication failed");
        } else if self.0.is_retryable() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Webhook processing failed");
        } else {
            tracing::warn!(error = %self.0, status = status.as_u16(), "Webhook rejected");
        }

        ApiResponse::error(status, webhook_error_code(&self.0), self.0.to_string()).into_response()
    }
}
