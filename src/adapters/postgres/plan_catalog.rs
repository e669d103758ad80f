//! PostgreSQL plan catalog.
//!
//! Plans are reference data maintained outside this service; the catalog only
//! reads them.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, PlanId};
use crate::domain::subscription::Plan;
use crate::ports::PlanCatalog;

pub struct PostgresPlanCatalog {
    pool: PgPool,
}

impl PostgresPlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlanRow {
    id: String,
    display_name: String,
    provider_price_id: String,
    price: i64,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        let id = PlanId::new(row.id)
            .map_err(|e| DomainError::database(format!("Invalid plan id: {}", e)))?;
        Plan::new(id, row.display_name, row.provider_price_id, row.price)
            .map_err(|e| DomainError::database(format!("Invalid plan row: {}", e)))
    }
}

#[async_trait]
impl PlanCatalog for PostgresPlanCatalog {
    async fn find(&self, id: &PlanId) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, display_name, provider_price_id, price FROM plans WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find plan: {}", e)))?;

        row.map(Plan::try_from).transpose()
    }

    async fn find_by_price_id(&self, price_id: &str) -> Result<Option<Plan>, DomainError> {
        let row: Option<PlanRow> = sqlx::query_as(
            "SELECT id, display_name, provider_price_id, price FROM plans WHERE provider_price_id = $1",
        )
        .bind(price_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to find plan by price: {}", e)))?;

        row.map(Plan::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<Plan>, DomainError> {
        let rows: Vec<PlanRow> = sqlx::query_as(
            "SELECT id, display_name, provider_price_id, price FROM plans ORDER BY price, id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DomainError::database(format!("Failed to list plans: {}", e)))?;

        rows.into_iter().map(Plan::try_from).collect()
    }
}
