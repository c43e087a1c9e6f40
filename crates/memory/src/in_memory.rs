//! In-memory memory store — useful for testing and single-process runs.

use async_trait::async_trait;
use chrono::Utc;
use keepsake_core::error::MemoryError;
use keepsake_core::memory::{clamp_importance, MemoryRecord, MemoryStore, MemoryTopic};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A memory store backed by a Vec. Useful for testing and deployments
/// where durable fact storage isn't needed.
pub struct InMemoryMemoryStore {
    records: Arc<RwLock<Vec<MemoryRecord>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_keyword(record: &MemoryRecord, keyword: &str) -> bool {
    if keyword.is_empty() {
        return true;
    }
    record.content.to_lowercase().contains(keyword)
        || record
            .related_topics
            .iter()
            .any(|t| t.to_lowercase().contains(keyword))
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn write(&self, mut record: MemoryRecord) -> Result<String, MemoryError> {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        record.importance = clamp_importance(record.importance);
        let id = record.id.clone();
        self.records.write().await.push(record);
        Ok(id)
    }

    async fn search_by_topic(
        &self,
        user_id: &str,
        topic: &str,
        topic_filter: Option<MemoryTopic>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let keyword = topic.trim().to_lowercase();
        let records = self.records.read().await;

        let mut results: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| r.user_id == user_id)
            .filter(|r| topic_filter.map_or(true, |t| r.topic == t))
            .filter(|r| matches_keyword(r, &keyword))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.last_referenced_at.cmp(&a.last_referenced_at))
        });
        results.truncate(limit);

        Ok(results)
    }

    async fn touch(&self, id: &str) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        match records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                record.last_referenced_at = Utc::now();
                Ok(())
            }
            None => Err(MemoryError::NotFound(id.to_string())),
        }
    }

    async fn high_importance(
        &self,
        user_id: &str,
        min_importance: f32,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        let mut results: Vec<MemoryRecord> = records
            .iter()
            .filter(|r| r.user_id == user_id && r.importance >= min_importance)
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);

        Ok(results)
    }

    async fn count(&self, user_id: &str) -> Result<usize, MemoryError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| r.user_id == user_id).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, content: &str, topic: MemoryTopic, importance: f32) -> MemoryRecord {
        MemoryRecord::new(user, content, topic, importance, vec![])
    }

    #[tokio::test]
    async fn write_assigns_id_and_counts() {
        let store = InMemoryMemoryStore::new();
        let id = store
            .write(record("u1", "has a cat named Trixie", MemoryTopic::Personal, 0.9))
            .await
            .unwrap();
        assert!(!id.is_empty());
        assert_eq!(store.count("u1").await.unwrap(), 1);
        assert_eq!(store.count("u2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_clamps_importance() {
        let store = InMemoryMemoryStore::new();
        let mut rec = record("u1", "fact", MemoryTopic::Personal, 0.5);
        rec.importance = 1.7;
        let id = store.write(rec).await.unwrap();

        let results = store.high_importance("u1", 0.9, 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, id);
        assert_eq!(results[0].importance, 1.0);
    }

    #[tokio::test]
    async fn search_matches_content_and_related_topics() {
        let store = InMemoryMemoryStore::new();
        store
            .write(record("u1", "has a cat named Trixie", MemoryTopic::Personal, 0.9))
            .await
            .unwrap();
        store
            .write(MemoryRecord::new(
                "u1",
                "enjoys drawing animals",
                MemoryTopic::Interest,
                0.6,
                vec!["cats".into(), "art".into()],
            ))
            .await
            .unwrap();
        store
            .write(record("u1", "won the spelling bee", MemoryTopic::Achievement, 0.8))
            .await
            .unwrap();

        let results = store.search_by_topic("u1", "cat", None, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        // Importance descending
        assert!(results[0].content.contains("Trixie"));
    }

    #[tokio::test]
    async fn search_respects_topic_filter() {
        let store = InMemoryMemoryStore::new();
        store
            .write(record("u1", "loves painting", MemoryTopic::Interest, 0.8))
            .await
            .unwrap();
        store
            .write(record("u1", "painting class on Tuesdays", MemoryTopic::Personal, 0.5))
            .await
            .unwrap();

        let results = store
            .search_by_topic("u1", "painting", Some(MemoryTopic::Interest), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].topic, MemoryTopic::Interest);
    }

    #[tokio::test]
    async fn search_unknown_user_is_empty_not_error() {
        let store = InMemoryMemoryStore::new();
        let results = store.search_by_topic("ghost", "anything", None, 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn touch_bumps_last_referenced_only() {
        let store = InMemoryMemoryStore::new();
        let id = store
            .write(record("u1", "fact", MemoryTopic::Personal, 0.5))
            .await
            .unwrap();
        let before = store.search_by_topic("u1", "fact", None, 1).await.unwrap()[0].clone();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.touch(&id).await.unwrap();

        let after = store.search_by_topic("u1", "fact", None, 1).await.unwrap()[0].clone();
        assert!(after.last_referenced_at > before.last_referenced_at);
        assert_eq!(after.importance, before.importance);
    }

    #[tokio::test]
    async fn touch_unknown_id_is_not_found() {
        let store = InMemoryMemoryStore::new();
        assert!(matches!(
            store.touch("missing").await,
            Err(MemoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn high_importance_filters_and_sorts() {
        let store = InMemoryMemoryStore::new();
        store.write(record("u1", "minor", MemoryTopic::Personal, 0.2)).await.unwrap();
        store.write(record("u1", "major", MemoryTopic::Personal, 0.9)).await.unwrap();
        store.write(record("u1", "medium", MemoryTopic::Personal, 0.7)).await.unwrap();

        let results = store.high_importance("u1", 0.7, 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "major");
        assert_eq!(results[1].content, "medium");
    }
}
