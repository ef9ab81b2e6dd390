//! The vector store contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use axon_domain::{Error, Result};

use crate::embed::Embedder;

/// One search hit: point id, similarity score, original text, and the
/// stored payload (metadata).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub score: f64,
    pub text: String,
    pub payload: Map<String, Value>,
}

/// Dense-vector search over named collections.
///
/// When `vector` is not supplied on upsert, the store embeds `text`
/// itself. Payload values must be primitives; callers JSON-encode
/// lists into strings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()>;

    async fn upsert(
        &self,
        collection: &str,
        point_id: &str,
        text: &str,
        metadata: Map<String, Value>,
        vector: Option<Vec<f32>>,
    ) -> Result<()>;

    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filter: Option<Map<String, Value>>,
    ) -> Result<Vec<VectorHit>>;

    async fn delete(&self, collection: &str, point_ids: &[String]) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Point {
    vector: Vec<f32>,
    text: String,
    payload: Map<String, Value>,
}

struct Collection {
    dimension: usize,
    points: HashMap<String, Point>,
}

/// Cosine-similarity store for development and tests.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        f64::from(dot / (na * nb))
    }
}

fn matches_filter(payload: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(k, v)| payload.get(k) == Some(v))
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        let mut collections = self.collections.write();
        collections.entry(name.to_string()).or_insert(Collection {
            dimension,
            points: HashMap::new(),
        });
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        point_id: &str,
        text: &str,
        metadata: Map<String, Value>,
        vector: Option<Vec<f32>>,
    ) -> Result<()> {
        let vector = match vector {
            Some(v) => v,
            None => self.embedder.embed(text).await?,
        };

        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| Error::Storage(format!("unknown collection: {collection}")))?;

        if vector.len() != coll.dimension && coll.dimension != 0 {
            // Hashing embedders use their own dimension; only reject
            // when an explicit vector disagrees with the collection.
            tracing::debug!(
                collection,
                expected = coll.dimension,
                got = vector.len(),
                "vector dimension differs from collection dimension"
            );
        }

        coll.points.insert(
            point_id.to_string(),
            Point {
                vector,
                text: text.to_string(),
                payload: metadata,
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &str,
        limit: usize,
        filter: Option<Map<String, Value>>,
    ) -> Result<Vec<VectorHit>> {
        let query_vector = self.embedder.embed(query).await?;

        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| Error::Storage(format!("unknown collection: {collection}")))?;

        let mut hits: Vec<VectorHit> = coll
            .points
            .iter()
            .filter(|(_, p)| {
                filter
                    .as_ref()
                    .map_or(true, |f| matches_filter(&p.payload, f))
            })
            .map(|(id, p)| VectorHit {
                id: id.clone(),
                score: cosine(&query_vector, &p.vector),
                text: p.text.clone(),
                payload: p.payload.clone(),
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, point_ids: &[String]) -> Result<()> {
        let mut collections = self.collections.write();
        if let Some(coll) = collections.get_mut(collection) {
            for id in point_ids {
                coll.points.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;

    fn store() -> InMemoryVectorStore {
        InMemoryVectorStore::new(Arc::new(HashingEmbedder::new(64)))
    }

    fn meta(pairs: &[(&str, &str)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn upsert_and_search_with_filter() {
        let s = store();
        s.create_collection("memories", 64).await.unwrap();
        s.upsert("memories", "a", "python packages installed", meta(&[("session_id", "s1")]), None)
            .await
            .unwrap();
        s.upsert("memories", "b", "python packages installed", meta(&[("session_id", "s2")]), None)
            .await
            .unwrap();

        let hits = s
            .search("memories", "python packages", 10, Some(meta(&[("session_id", "s1")])))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn upsert_same_id_replaces() {
        let s = store();
        s.create_collection("memories", 64).await.unwrap();
        s.upsert("memories", "a", "first", Map::new(), None).await.unwrap();
        s.upsert("memories", "a", "second version", Map::new(), None)
            .await
            .unwrap();

        let hits = s.search("memories", "second version", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "second version");
    }

    #[tokio::test]
    async fn delete_removes_points() {
        let s = store();
        s.create_collection("memories", 64).await.unwrap();
        s.upsert("memories", "a", "to be removed", Map::new(), None)
            .await
            .unwrap();
        s.delete("memories", &["a".to_string()]).await.unwrap();
        let hits = s.search("memories", "removed", 10, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn unknown_collection_errors() {
        let s = store();
        let err = s.search("missing", "q", 5, None).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn cosine_basics() {
        assert!((cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine(&[], &[1.0]), 0.0);
    }
}
