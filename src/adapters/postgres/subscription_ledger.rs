//! PostgreSQL implementation of SubscriptionLedger.
//!
//! The partial unique index `subscriptions_one_active_per_user` is the last
//! line of defence for the one-active-row rule: whatever the callers do, the
//! database refuses a second active row for a user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{
    DomainError, ErrorCode, PlanId, SubscriptionId, Timestamp, UserId,
};
use crate::domain::subscription::Subscription;
use crate::ports::SubscriptionLedger;

const ONE_ACTIVE_PER_USER: &str = "subscriptions_one_active_per_user";

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, plan_id, provider_subscription_id, period_end, is_active, created_at
    FROM subscriptions
"#;

/// PostgreSQL implementation of the SubscriptionLedger port.
pub struct PostgresSubscriptionLedger {
    pool: PgPool,
}

impl PostgresSubscriptionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of a subscription.
#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: String,
    plan_id: String,
    provider_subscription_id: String,
    period_end: DateTime<Utc>,
    is_active: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| {
                DomainError::database(format!("Invalid user_id: {}", e))
            })?,
            plan_id: PlanId::new(row.plan_id).map_err(|e| {
                DomainError::database(format!("Invalid plan_id: {}", e))
            })?,
            provider_subscription_id: row.provider_subscription_id,
            period_end: Timestamp::from_datetime(row.period_end),
            is_active: row.is_active,
            created_at: Timestamp::from_datetime(row.created_at),
        })
    }
}

fn is_one_active_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.constraint() == Some(ONE_ACTIVE_PER_USER))
}

fn conflict(user_id: &UserId) -> DomainError {
    DomainError::new(
        ErrorCode::ActiveSubscriptionConflict,
        format!("User {} already has an active subscription", user_id),
    )
    .with_detail("user_id", user_id.as_str())
}

fn query_failed(action: &str, err: sqlx::Error) -> DomainError {
    DomainError::database(format!("Failed to {}: {}", action, err))
}

#[async_trait]
impl SubscriptionLedger for PostgresSubscriptionLedger {
    async fn find_for_user(
        &self,
        id: &SubscriptionId,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE id = $1 AND user_id = $2", SELECT_COLUMNS))
                .bind(id.as_uuid())
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("find subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_active_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Option<Subscription>, DomainError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{} WHERE user_id = $1 AND is_active", SELECT_COLUMNS))
                .bind(user_id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| query_failed("find active subscription", e))?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_by_provider_subscription_id(
        &self,
        provider_subscription_id: &str,
    ) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE provider_subscription_id = $1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(provider_subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("find subscriptions by provider id", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Subscription>, DomainError> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            "{} WHERE user_id = $1 ORDER BY created_at DESC",
            SELECT_COLUMNS
        ))
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_failed("list subscriptions", e))?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn insert_active(&self, subscription: &Subscription) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, provider_subscription_id, period_end, is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            "#,
        )
        .bind(subscription.id.as_uuid())
        .bind(subscription.user_id.as_str())
        .bind(subscription.plan_id.as_str())
        .bind(&subscription.provider_subscription_id)
        .bind(subscription.period_end.as_datetime())
        .bind(subscription.created_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_one_active_violation(&e) {
                return conflict(&subscription.user_id);
            }
            query_failed("insert subscription", e)
        })?;

        Ok(())
    }

    async fn supersede(
        &self,
        previous: &SubscriptionId,
        replacement: &Subscription,
    ) -> Result<(), DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| query_failed("begin transaction", e))?;

        let deactivated = sqlx::query(
            r#"
            UPDATE subscriptions SET is_active = FALSE
            WHERE id = $1 AND user_id = $2 AND is_active
            "#,
        )
        .bind(previous.as_uuid())
        .bind(replacement.user_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| query_failed("deactivate subscription", e))?;

        if deactivated.rows_affected() == 0 {
            return Err(DomainError::new(
                ErrorCode::StaleSubscription,
                format!("Subscription {} is no longer active", previous),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, user_id, plan_id, provider_subscription_id, period_end, is_active, created_at
            ) VALUES ($1, $2, $3, $4, $5, TRUE, $6)
            "#,
        )
        .bind(replacement.id.as_uuid())
        .bind(replacement.user_id.as_str())
        .bind(replacement.plan_id.as_str())
        .bind(&replacement.provider_subscription_id)
        .bind(replacement.period_end.as_datetime())
        .bind(replacement.created_at.as_datetime())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_one_active_violation(&e) {
                return conflict(&replacement.user_id);
            }
            query_failed("insert replacement subscription", e)
        })?;

        tx.commit()
            .await
            .map_err(|e| query_failed("commit plan change", e))?;

        Ok(())
    }

    async fn update_provider_state(
        &self,
        id: &SubscriptionId,
        provider_subscription_id: &str,
        period_end: Timestamp,
    ) -> Result<Subscription, DomainError> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            UPDATE subscriptions SET
                provider_subscription_id = $2,
                period_end = GREATEST(period_end, $3)
            WHERE id = $1
            RETURNING id, user_id, plan_id, provider_subscription_id, period_end, is_active, created_at
            "#,
        )
        .bind(id.as_uuid())
        .bind(provider_subscription_id)
        .bind(period_end.as_datetime())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_failed("update subscription", e))?;

        match row {
            Some(row) => Subscription::try_from(row),
            None => Err(DomainError::new(
                ErrorCode::SubscriptionNotFound,
                format!("Subscription not found: {}", id),
            )),
        }
    }

    async fn deactivate(&self, id: &SubscriptionId) -> Result<bool, DomainError> {
        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = FALSE WHERE id = $1 AND is_active",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| query_failed("deactivate subscription", e))?;

        Ok(result.rows_affected() > 0)
    }
}
