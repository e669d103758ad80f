//! Plan - immutable catalog entry mapping a plan to a provider price.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PlanId, ValidationError};

/// A purchasable tier.
///
/// `price` is the display amount in minor units; billing math happens at the
/// provider and is never computed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub display_name: String,
    pub provider_price_id: String,
    pub price: i64,
}

impl Plan {
    /// Builds a plan, rejecting blank names, blank price references and
    /// negative amounts.
    pub fn new(
        id: PlanId,
        display_name: impl Into<String>,
        provider_price_id: impl Into<String>,
        price: i64,
    ) -> Result<Self, ValidationError> {
        let display_name = display_name.into();
        let provider_price_id = provider_price_id.into();

        if display_name.trim().is_empty() {
            return Err(ValidationError::empty_field("display_name"));
        }
        if provider_price_id.trim().is_empty() {
            return Err(ValidationError::empty_field("provider_price_id"));
        }
        if price < 0 {
            return Err(ValidationError::invalid_format("price", "must not be negative"));
        }

        Ok(Self {
            id,
            display_name,
            provider_price_id,
            price,
        })
    }
}
