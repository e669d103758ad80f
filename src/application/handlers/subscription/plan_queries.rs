//! Plan catalog queries.

use std::sync::Arc;

use crate::domain::foundation::PlanId;
use crate::domain::subscription::{Plan, SubscriptionError};
use crate::ports::PlanCatalog;

/// Query to list every plan.
#[derive(Debug, Clone, Default)]
pub struct ListPlansQuery;

/// Handler for listing plans, cheapest first.
pub struct ListPlansHandler {
    plans: Arc<dyn PlanCatalog>,
}

impl ListPlansHandler {
    pub fn new(plans: Arc<dyn PlanCatalog>) -> Self {
        Self { plans }
    }

    pub async fn handle(&self, _query: ListPlansQuery) -> Result<Vec<Plan>, SubscriptionError> {
        Ok(self.plans.list().await?)
    }
}

/// Query to get one plan.
#[derive(Debug, Clone)]
pub struct GetPlanQuery {
    pub plan_id: PlanId,
}

pub struct GetPlanHandler {
    plans: Arc<dyn PlanCatalog>,
}

impl GetPlanHandler {
    pub fn new(plans: Arc<dyn PlanCatalog>) -> Self {
        Self { plans }
    }

    pub async fn handle(&self, query: GetPlanQuery) -> Result<Plan, SubscriptionError> {
        self.plans
            .find(&query.plan_id)
            .await?
            .ok_or_else(|| SubscriptionError::plan_not_found(query.plan_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::DomainError;
    use async_trait::async_trait;

    struct MockPlanCatalog {
        plans: Vec<Plan>,
        fail_read: bool,
    }

    #[async_trait]
    impl PlanCatalog for MockPlanCatalog {
        async fn find(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
            if self.fail_read {
                return Err(DomainError::database("Simulated read failure"));
            }
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
            if self.fail_read {
                return Err(DomainError::database("Simulated read failure"));
            }
            Ok(self.plans.clone())
        }
    }

    fn catalog(fail_read: bool) -> Arc<MockPlanCatalog> {
        Arc::new(MockPlanCatalog {
            plans: vec![Plan::new(PlanId::new("basic").unwrap(), "Basic", "price_basic", 1000).unwrap()],
            fail_read,
        })
    }

    #[tokio::test]
    async fn lists_plans() {
        let handler = ListPlansHandler::new(catalog(false));
        assert_eq!(handler.handle(ListPlansQuery).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let handler = GetPlanHandler::new(catalog(false));

        let err = handler
            .handle(GetPlanQuery {
                plan_id: PlanId::new("gold").unwrap(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SubscriptionError::PlanNotFound(_)));
    }

    #[tokio::test]
    async fn read_failure_is_infrastructure_error() {
        let handler = ListPlansHandler::new(catalog(true));

        let err = handler.handle(ListPlansQuery).await.unwrap_err();

        assert!(matches!(err, SubscriptionError::Infrastructure(_)));
    }
}
