use crate::error::{StagehandError, StagehandResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A single recalled piece of context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnippet {
    /// Unique id assigned on write.
    pub id: Uuid,
    /// Partition the snippet was stored under.
    pub partition: String,
    /// Remembered text.
    pub content: String,
    /// Caller-supplied metadata from `embed`.
    pub metadata: serde_json::Value,
    /// Relevance to the query, higher is better.
    pub score: f32,
    /// When the snippet was written.
    pub created_at: DateTime<Utc>,
}

/// Partitioned context recall and write-back.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Up to `limit` snippets from `partition`, best match first.
    async fn recall(
        &self,
        partition: &str,
        query: &str,
        limit: usize,
    ) -> StagehandResult<Vec<MemorySnippet>>;

    /// Store `content` in `partition`.
    async fn embed(
        &self,
        content: &str,
        partition: &str,
        metadata: serde_json::Value,
    ) -> StagehandResult<()>;
}

struct Entry {
    id: Uuid,
    content: String,
    terms: HashSet<String>,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

/// In-memory [`MemoryService`] ranking by term overlap.
///
/// Not a vector store: the score is the fraction of query terms present in
/// the entry. Entries with no overlap are never returned.
pub struct InMemoryMemory {
    partitions: RwLock<HashMap<String, Vec<Entry>>>,
}

impl InMemoryMemory {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries stored in `partition`.
    pub async fn count(&self, partition: &str) -> usize {
        self.partitions
            .read()
            .await
            .get(partition)
            .map_or(0, Vec::len)
    }

    /// Raw contents of `partition`, oldest first.
    pub async fn contents(&self, partition: &str) -> Vec<String> {
        self.partitions
            .read()
            .await
            .get(partition)
            .map(|entries| entries.iter().map(|e| e.content.clone()).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryMemory {
    fn default() -> Self {
        Self::new()
    }
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryService for InMemoryMemory {
    async fn recall(
        &self,
        partition: &str,
        query: &str,
        limit: usize,
    ) -> StagehandResult<Vec<MemorySnippet>> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let partitions = self.partitions.read().await;
        let Some(entries) = partitions.get(partition) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<MemorySnippet> = entries
            .iter()
            .filter_map(|e| {
                let hits = query_terms.intersection(&e.terms).count();
                (hits > 0).then(|| MemorySnippet {
                    id: e.id,
                    partition: partition.to_string(),
                    content: e.content.clone(),
                    metadata: e.metadata.clone(),
                    score: hits as f32 / query_terms.len() as f32,
                    created_at: e.created_at,
                })
            })
            .collect();

        // Highest score first, newest first among equals
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn embed(
        &self,
        content: &str,
        partition: &str,
        metadata: serde_json::Value,
    ) -> StagehandResult<()> {
        if partition.trim().is_empty() {
            return Err(StagehandError::Memory("empty partition name".into()));
        }
        let entry = Entry {
            id: Uuid::new_v4(),
            content: content.to_string(),
            terms: tokenize(content),
            metadata,
            created_at: Utc::now(),
        };
        self.partitions
            .write()
            .await
            .entry(partition.to_string())
            .or_default()
            .push(entry);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_recall_ranks_by_overlap() {
        let mem = InMemoryMemory::new();
        mem.embed("rust borrow checker error", "code", json!({}))
            .await
            .unwrap();
        mem.embed("null pointer bug in parser", "code", json!({}))
            .await
            .unwrap();
        mem.embed("weather today is sunny", "code", json!({}))
            .await
            .unwrap();

        let hits = mem.recall("code", "fix this null pointer bug", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].content.contains("null pointer"));
        assert!(hits[0].score > 0.5);
    }

    #[tokio::test]
    async fn test_partitions_are_isolated() {
        let mem = InMemoryMemory::new();
        mem.embed("favorite song list", "music", json!({"k": 1}))
            .await
            .unwrap();
        assert!(mem.recall("code", "favorite song", 5).await.unwrap().is_empty());
        assert_eq!(mem.count("music").await, 1);
        assert_eq!(mem.count("code").await, 0);
    }

    #[tokio::test]
    async fn test_limit_and_empty_partition() {
        let mem = InMemoryMemory::new();
        for i in 0..5 {
            mem.embed(&format!("deploy note {i}"), "ops", json!({}))
                .await
                .unwrap();
        }
        assert_eq!(mem.recall("ops", "deploy", 2).await.unwrap().len(), 2);
        assert!(mem.embed("x", "  ", json!({})).await.is_err());
    }
}
