//! The hybrid long-term memory store.
//!
//! Each memory lives in two places under the same id: the vector
//! collection `"memories"` (content + search payload) and the document
//! store (the full record) under the namespace
//! `("session_{sid}", "memories", type)`. Search is the source of
//! truth for recall: a vector hit whose document cannot be resolved in
//! any candidate namespace is skipped, never surfaced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use axon_domain::{Error, Memory, Result};

use crate::docstore::DocumentStore;
use crate::vector::VectorStore;

const COLLECTION: &str = "memories";

pub struct LongTermMemoryStore {
    vector: Arc<dyn VectorStore>,
    docs: Arc<dyn DocumentStore>,
    dimension: usize,
}

fn session_namespace(session_id: &str) -> String {
    format!("session_{session_id}")
}

impl LongTermMemoryStore {
    pub fn new(
        vector: Arc<dyn VectorStore>,
        docs: Arc<dyn DocumentStore>,
        dimension: usize,
    ) -> Self {
        Self {
            vector,
            docs,
            dimension,
        }
    }

    /// Initialise both stores. Idempotent.
    pub async fn setup(&self) -> Result<()> {
        self.docs.setup().await?;
        self.vector.create_collection(COLLECTION, self.dimension).await?;
        tracing::info!(collection = COLLECTION, dimension = self.dimension, "memory store ready");
        Ok(())
    }

    /// Store a memory in both planes; returns the new id.
    ///
    /// Two-phase: document first, vector second. A vector failure
    /// surfaces as `Storage`; the orphaned document is invisible to
    /// recall (search never returns it without a vector point).
    pub async fn put(
        &self,
        session_id: &str,
        memory_type: &str,
        content: &str,
        importance: f64,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        self.put_with_id(
            session_id,
            &Uuid::new_v4().to_string(),
            memory_type,
            content,
            importance,
            metadata,
        )
        .await
    }

    /// Store under a caller-supplied id (stable ingestion ids). A
    /// second write with the same id overwrites the document and
    /// re-indexes the vector point.
    pub async fn put_with_id(
        &self,
        session_id: &str,
        memory_id: &str,
        memory_type: &str,
        content: &str,
        importance: f64,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let namespace = vec![
            session_namespace(session_id),
            "memories".to_string(),
            memory_type.to_string(),
        ];

        let record = serde_json::json!({
            "content": content,
            "type": memory_type,
            "importance": importance,
            "metadata": metadata.clone(),
            "created_at": Utc::now().to_rfc3339(),
        });
        self.docs.put(&namespace, memory_id, record).await?;

        let mut payload = metadata;
        payload.insert("session_id".into(), Value::String(session_id.to_string()));
        payload.insert("memory_type".into(), Value::String(memory_type.to_string()));
        payload.insert(
            "importance".into(),
            serde_json::Number::from_f64(importance)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );

        self.vector
            .upsert(COLLECTION, memory_id, content, payload, None)
            .await
            .map_err(|e| Error::Storage(format!("vector upsert failed: {e}")))?;

        tracing::info!(
            memory_id,
            memory_type,
            importance,
            "stored long-term memory"
        );
        Ok(memory_id.to_string())
    }

    /// Semantic search within one session's memories.
    ///
    /// Overfetches 2×limit vector candidates, resolves each hit's
    /// document through the candidate namespaces (requested type, the
    /// hit payload's type, then the untyped namespace), ranks by
    /// `(score, importance)` descending, and returns the first `limit`.
    pub async fn search(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
        memory_type: Option<&str>,
    ) -> Result<Vec<Memory>> {
        let mut filter = Map::new();
        filter.insert("session_id".into(), Value::String(session_id.to_string()));

        let hits = self
            .vector
            .search(COLLECTION, query, limit * 2, Some(filter))
            .await?;

        tracing::debug!(
            session_id,
            candidates = hits.len(),
            "vector search returned candidates"
        );

        let base = vec![session_namespace(session_id), "memories".to_string()];
        let mut memories = Vec::new();

        for hit in hits {
            let mut candidates: Vec<Vec<String>> = Vec::new();
            if let Some(t) = memory_type {
                candidates.push([base.clone(), vec![t.to_string()]].concat());
            }
            if let Some(hit_type) = hit.payload.get("memory_type").and_then(|v| v.as_str()) {
                if Some(hit_type) != memory_type {
                    candidates.push([base.clone(), vec![hit_type.to_string()]].concat());
                }
            }
            candidates.push(base.clone());

            let mut document = None;
            for namespace in &candidates {
                if let Some(doc) = self.docs.get(namespace, &hit.id).await? {
                    document = Some(doc);
                    break;
                }
            }

            let Some(document) = document else {
                tracing::warn!(memory_id = %hit.id, "vector hit without a document, skipping");
                continue;
            };

            let doc_type = document
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_default()
                .to_string();
            if let Some(wanted) = memory_type {
                if doc_type != wanted {
                    continue;
                }
            }

            let content = document
                .get("content")
                .and_then(|c| c.as_str())
                .map(String::from)
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| hit.text.clone());
            if content.is_empty() {
                continue;
            }

            memories.push(Memory {
                id: hit.id.clone(),
                session_id: session_id.to_string(),
                memory_type: doc_type,
                content,
                importance: document
                    .get("importance")
                    .and_then(|i| i.as_f64())
                    .unwrap_or(0.0),
                created_at: document
                    .get("created_at")
                    .and_then(|c| c.as_str())
                    .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now),
                metadata: document
                    .get("metadata")
                    .and_then(|m| m.as_object())
                    .cloned()
                    .unwrap_or_default(),
                score: hit.score,
            });
        }

        memories.sort_by(|a, b| {
            (b.score, b.importance)
                .partial_cmp(&(a.score, a.importance))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        memories.truncate(limit);
        Ok(memories)
    }

    /// Delete a memory from both planes.
    pub async fn delete(&self, session_id: &str, memory_id: &str, memory_type: &str) -> Result<()> {
        let namespace = vec![
            session_namespace(session_id),
            "memories".to_string(),
            memory_type.to_string(),
        ];
        self.docs.delete(&namespace, memory_id).await?;
        self.vector
            .delete(COLLECTION, &[memory_id.to_string()])
            .await?;
        tracing::info!(memory_id, "deleted long-term memory");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docstore::InMemoryDocumentStore;
    use crate::embed::HashingEmbedder;
    use crate::vector::InMemoryVectorStore;

    fn store() -> LongTermMemoryStore {
        let embedder = Arc::new(HashingEmbedder::new(64));
        LongTermMemoryStore::new(
            Arc::new(InMemoryVectorStore::new(embedder)),
            Arc::new(InMemoryDocumentStore::new()),
            64,
        )
    }

    #[tokio::test]
    async fn put_then_search_returns_memory() {
        let s = store();
        s.setup().await.unwrap();

        let id = s
            .put("s1", "fact", "the user prefers dark mode", 8.0, Map::new())
            .await
            .unwrap();

        let found = s.search("s1", "dark mode preference", 5, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);
        assert_eq!(found[0].memory_type, "fact");
        assert!(!found[0].content.is_empty());
        assert!((found[0].importance - 8.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn search_is_isolated_per_session() {
        let s = store();
        s.setup().await.unwrap();
        s.put("s1", "fact", "alpha memo content", 5.0, Map::new())
            .await
            .unwrap();
        s.put("s2", "fact", "alpha memo content", 5.0, Map::new())
            .await
            .unwrap();

        let found = s.search("s1", "alpha memo", 10, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, "s1");
    }

    #[tokio::test]
    async fn type_filter_resolves_through_payload_namespace() {
        let s = store();
        s.setup().await.unwrap();
        s.put("s1", "simplemem_atom", "the atom content here", 5.0, Map::new())
            .await
            .unwrap();
        s.put("s1", "fact", "a plain fact here", 5.0, Map::new())
            .await
            .unwrap();

        // Requesting a type the hit doesn't have falls back to the
        // payload's memory_type namespace, then filters it out.
        let atoms = s
            .search("s1", "content here", 10, Some("simplemem_atom"))
            .await
            .unwrap();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].memory_type, "simplemem_atom");
    }

    #[tokio::test]
    async fn dangling_vector_hits_are_skipped() {
        let embedder: Arc<dyn crate::embed::Embedder> = Arc::new(HashingEmbedder::new(64));
        let vector = Arc::new(InMemoryVectorStore::new(embedder));
        let docs = Arc::new(InMemoryDocumentStore::new());
        let s = LongTermMemoryStore::new(vector.clone(), docs, 64);
        s.setup().await.unwrap();

        // A point with no corresponding document.
        let mut payload = Map::new();
        payload.insert("session_id".into(), Value::String("s1".into()));
        vector
            .upsert(COLLECTION, "ghost", "spooky orphaned point", payload, None)
            .await
            .unwrap();

        let found = s.search("s1", "spooky orphaned", 5, None).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn second_writer_wins_on_same_id() {
        let s = store();
        s.setup().await.unwrap();
        s.put_with_id("s1", "m1", "fact", "first version", 5.0, Map::new())
            .await
            .unwrap();
        s.put_with_id("s1", "m1", "fact", "second version", 6.0, Map::new())
            .await
            .unwrap();

        let found = s.search("s1", "second version", 5, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "second version");
        assert!((found[0].importance - 6.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn delete_removes_from_both_planes() {
        let s = store();
        s.setup().await.unwrap();
        let id = s
            .put("s1", "fact", "temporary memory entry", 5.0, Map::new())
            .await
            .unwrap();
        s.delete("s1", &id, "fact").await.unwrap();
        let found = s.search("s1", "temporary memory", 5, None).await.unwrap();
        assert!(found.is_empty());
    }
}
