//! In-memory plan catalog, seeded at construction.

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, PlanId};
use crate::domain::subscription::Plan;
use crate::ports::PlanCatalog;

/// Fixed plan catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPlanCatalog {
    plans: Vec<Plan>,
}

impl InMemoryPlanCatalog {
    pub fn new(mut plans: Vec<Plan>) -> Self {
        plans.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.id.cmp(&b.id)));
        Self { plans }
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn find(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.iter().find(|p| &p.id == id).cloned())
    }

    async fn find_by_price_id(&self, price_id: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .iter()
            .find(|p| p.provider_price_id == price_id)
            .cloned())
    }

    async fn list(&self) -> Result<Vec<Plan>, DomainError> {
        Ok(self.plans.clone())
    }
}
