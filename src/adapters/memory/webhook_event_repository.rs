//! In-memory webhook event repository.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::foundation::DomainError;
use crate::ports::{SaveResult, WebhookEventRecord, WebhookEventRepository};

/// Processed-event records keyed by event id.
#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    records: RwLock<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn find_by_event_id(
        &self,
        event_id: &str,
    ) -> Result<Option<WebhookEventRecord>, DomainError> {
        Ok(self.records.read().await.get(event_id).cloned())
    }

    async fn save(&self, record: WebhookEventRecord) -> Result<SaveResult, DomainError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.event_id) {
            return Ok(SaveResult::AlreadyExists);
        }
        records.insert(record.event_id.clone(), record);
        Ok(SaveResult::Inserted)
    }

    async fn delete_before(&self, timestamp: DateTime<Utc>) -> Result<u64, DomainError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.processed_at >= timestamp);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn save_reports_duplicate() {
        let repo = InMemoryWebhookEventRepository::new();
        let record = WebhookEventRecord::success("evt_1", "subscription.created", serde_json::json!({}));

        assert_eq!(repo.save(record.clone()).await.unwrap(), SaveResult::Inserted);
        assert_eq!(repo.save(record).await.unwrap(), SaveResult::AlreadyExists);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn delete_before_removes_old_records_only() {
        let repo = InMemoryWebhookEventRepository::new();
        let mut old = WebhookEventRecord::success("evt_old", "subscription.created", serde_json::json!({}));
        old.processed_at = Utc::now() - Duration::days(40);
        repo.save(old).await.unwrap();
        repo.save(WebhookEventRecord::success("evt_new", "subscription.created", serde_json::json!({})))
            .await
            .unwrap();

        let deleted = repo.delete_before(Utc::now() - Duration::days(30)).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(repo.find_by_event_id("evt_new").await.unwrap().is_some());
        assert!(repo.find_by_event_id("evt_old").await.unwrap().is_none());
    }
}
