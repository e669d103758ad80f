//! Stripe wire types and webhook signature handling.
//!
//! These types mirror the Stripe JSON the gateway reads. Only the fields the
//! subscription lifecycle needs are declared; everything else is ignored.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::Timestamp;
use crate::domain::subscription::WebhookError;
use crate::ports::ProviderSubscription;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age for webhook events (5 minutes).
pub const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Clock skew tolerance for future timestamps (60 seconds).
pub const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

// ════════════════════════════════════════════════════════════════════════════════
// Signature Parsing
// ════════════════════════════════════════════════════════════════════════════════

/// Error parsing the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureParseError {
    /// Header is empty or missing.
    MissingHeader,
    /// Missing timestamp component (t=...).
    MissingTimestamp,
    /// Missing v1 signature component.
    MissingV1Signature,
    /// Invalid timestamp format.
    InvalidTimestamp,
    /// Invalid signature format (not valid hex).
    InvalidSignatureFormat,
}

impl std::fmt::Display for SignatureParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHeader => write!(f, "Missing Stripe-Signature header"),
            Self::MissingTimestamp => write!(f, "Missing timestamp (t=) in signature"),
            Self::MissingV1Signature => write!(f, "Missing v1 signature in header"),
            Self::InvalidTimestamp => write!(f, "Invalid timestamp format"),
            Self::InvalidSignatureFormat => write!(f, "Invalid signature format (not valid hex)"),
        }
    }
}

impl std::error::Error for SignatureParseError {}

impl From<SignatureParseError> for WebhookError {
    fn from(err: SignatureParseError) -> Self {
        match err {
            SignatureParseError::InvalidTimestamp => WebhookError::InvalidTimestamp,
            _ => WebhookError::InvalidSignature,
        }
    }
}

/// Parsed Stripe-Signature header.
///
/// The header format is `t=timestamp,v1=signature[,v1=signature...]`. Stripe
/// sends several `v1` entries while a signing secret is being rolled; any one
/// of them matching is enough.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    /// Unix timestamp when Stripe signed the event.
    pub timestamp: i64,

    /// Candidate v1 signatures (HMAC-SHA256).
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureParseError> {
        if header.trim().is_empty() {
            return Err(SignatureParseError::MissingHeader);
        }

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };

            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| SignatureParseError::InvalidTimestamp)?,
                    );
                }
                "v1" => {
                    v1_signatures.push(
                        hex::decode(value.trim())
                            .map_err(|_| SignatureParseError::InvalidSignatureFormat)?,
                    );
                }
                // v0 and unknown schemes are not trusted
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureParseError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureParseError::MissingV1Signature);
        }

        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

/// Compute the v1 signature of `payload` signed at `timestamp`.
pub fn compute_signature(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<Vec<u8>, WebhookError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| WebhookError::InvalidSignature)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Build a complete Stripe-Signature header value.
pub fn signature_header(
    secret: &SecretString,
    timestamp: i64,
    payload: &[u8],
) -> Result<String, WebhookError> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(signature)))
}

/// Verify a Stripe-Signature header against the raw payload.
///
/// Timestamps older than five minutes are rejected as replays; timestamps more
/// than a minute in the future are rejected as malformed. Comparison is
/// constant-time.
pub fn verify_signature(
    secret: &SecretString,
    payload: &[u8],
    header: &str,
    now: i64,
) -> Result<(), WebhookError> {
    let header = SignatureHeader::parse(header).map_err(|e| {
        tracing::warn!(error = %e, "Failed to parse Stripe-Signature header");
        WebhookError::from(e)
    })?;

    let age = now - header.timestamp;
    if age > MAX_TIMESTAMP_AGE_SECS {
        tracing::warn!(
            event_timestamp = header.timestamp,
            current_time = now,
            age_secs = age,
            "Webhook event too old - possible replay attack"
        );
        return Err(WebhookError::TimestampOutOfRange);
    }

    if age < -MAX_FUTURE_TOLERANCE_SECS {
        tracing::warn!(
            event_timestamp = header.timestamp,
            current_time = now,
            "Webhook event from future - clock skew or manipulation"
        );
        return Err(WebhookError::InvalidTimestamp);
    }

    let expected = compute_signature(secret, header.timestamp, payload)?;
    let matched = header
        .v1_signatures
        .iter()
        .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));

    if !matched {
        tracing::warn!("Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    Ok(())
}

// ════════════════════════════════════════════════════════════════════════════════
// API Response Types
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe list envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

/// Stripe Customer object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    /// Unique customer identifier (cus_...).
    pub id: String,

    pub email: Option<String>,

    /// Whether the customer has been deleted.
    #[serde(default)]
    pub deleted: bool,
}

/// Stripe Subscription object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    /// Unique subscription identifier (sub_...).
    pub id: String,

    pub status: String,

    /// Older API versions carry the period on the subscription itself.
    pub current_period_end: Option<i64>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

/// Single subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub id: String,

    pub price: Option<StripePrice>,

    /// Newer API versions carry the period on each item.
    pub current_period_end: Option<i64>,
}

/// Price reference on a subscription item.
#[derive(Debug, Clone, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

impl TryFrom<StripeSubscription> for ProviderSubscription {
    type Error = String;

    fn try_from(sub: StripeSubscription) -> Result<Self, Self::Error> {
        let first_item = sub.items.data.into_iter().next();
        let period_end = sub
            .current_period_end
            .or_else(|| first_item.as_ref().and_then(|item| item.current_period_end))
            .ok_or_else(|| format!("subscription {} has no current_period_end", sub.id))?;
        let current_period_end = Timestamp::from_unix_secs(period_end)
            .ok_or_else(|| format!("subscription {} has an invalid period end", sub.id))?;

        Ok(ProviderSubscription {
            id: sub.id,
            status: sub.status,
            current_period_end,
            price_id: first_item
                .as_ref()
                .and_then(|item| item.price.as_ref())
                .map(|price| price.id.clone()),
            item_id: first_item.map(|item| item.id),
            metadata: sub.metadata,
        })
    }
}

/// Stripe Checkout Session object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    /// Unique session identifier (cs_...).
    pub id: String,

    /// Hosted page the customer is sent to.
    pub url: Option<String>,
}

/// Stripe error envelope: `{"error": {"type": ..., "code": ..., "message": ...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorResponse {
    pub error: StripeErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorBody {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
}
