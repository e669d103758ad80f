//! PlanCatalog port - read-only plan reference data.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, PlanId};
use crate::domain::subscription::Plan;

/// Read access to the plan catalog.
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Find a plan by id.
    async fn find(&self, id: &PlanId) -> Result<Option<Plan>, DomainError>;

    /// Find the plan billed at a provider price.
    async fn find_by_price_id(&self, price_id: &str) -> Result<Option<Plan>, DomainError>;

    /// All plans, ordered by price then id.
    async fn list(&self) -> Result<Vec<Plan>, DomainError>;
}
