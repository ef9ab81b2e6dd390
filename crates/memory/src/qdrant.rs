//! Qdrant-backed vector store over its REST API.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use axon_domain::{Error, Result};

use crate::embed::Embedder;
use crate::vector::{VectorHit, VectorStore};

/// Vector store backed by a Qdrant server.
///
/// Embeddings are produced client-side through the configured
/// [`Embedder`]; Qdrant only ever sees dense vectors.
pub struct QdrantVectorStore {
    base_url: String,
    api_key: Option<String>,
    embedder: Arc<dyn Embedder>,
    client: reqwest::Client,
}

impl QdrantVectorStore {
    pub fn new(base_url: &str, api_key: Option<String>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            embedder,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value> {
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::Storage(format!("qdrant: {e}")))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::Storage(format!("qdrant: {e}")))?;
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "qdrant HTTP {}: {text}",
                status.as_u16()
            )));
        }
        serde_json::from_str(&text).map_err(|e| Error::Storage(format!("qdrant body: {e}")))
    }
}

fn filter_to_qdrant(filter: &Map<String, Value>) -> Value {
    let must: Vec<Value> = filter
        .iter()
        .map(|(k, v)| serde_json::json!({"key": k, "match": {"value": v}}))
        .collect();
    serde_json::json!({"must": must})
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn create_collection(&self, name: &str, dimension: usize) -> Result<()> {
        // Existing collections are left untouched.
        let existing = self
            .send(self.request(reqwest::Method::GET, "/collections"))
            .await?;
        let present = existing["result"]["collections"]
            .as_array()
            .map(|arr| arr.iter().any(|c| c["name"] == name))
            .unwrap_or(false);
        if present {
            return Ok(());
        }

        let body = serde_json::json!({
            "vectors": {"size": dimension, "distance": "Cosine"}
        });
        self.send(
            self.request(reqwest::Method::PUT, &format!("/collections/{name}"))
                .json(&body),
        )
        .await?;
        tracing::info!(collection = name, dimension, "created qdrant collection");
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

        let mut payload = metadata;
        payload.insert("text".into(), Value::String(text.to_string()));

        let body = serde_json::json!({
            "points": [{
                "id": point_id,
                "vector": vector,
                "payload": payload,
            }]
        });
        self.send(
            self.request(
                reqwest::Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&body),
        )
        .await?;
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

        let mut body = serde_json::json!({
            "vector": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = &filter {
            body["filter"] = filter_to_qdrant(filter);
        }

        let result = self
            .send(
                self.request(
                    reqwest::Method::POST,
                    &format!("/collections/{collection}/points/search"),
                )
                .json(&body),
            )
            .await?;

        let hits = result["result"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|hit| {
                let id = match &hit["id"] {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let score = hit["score"].as_f64().unwrap_or(0.0);
                let mut payload = hit["payload"].as_object().cloned().unwrap_or_default();
                let text = payload
                    .remove("text")
                    .and_then(|t| t.as_str().map(String::from))
                    .unwrap_or_default();
                Some(VectorHit {
                    id,
                    score,
                    text,
                    payload,
                })
            })
            .collect();

        Ok(hits)
    }

    async fn delete(&self, collection: &str, point_ids: &[String]) -> Result<()> {
        let body = serde_json::json!({"points": point_ids});
        self.send(
            self.request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/delete?wait=true"),
            )
            .json(&body),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_translation() {
        let mut filter = Map::new();
        filter.insert("session_id".into(), Value::String("s1".into()));
        let v = filter_to_qdrant(&filter);
        assert_eq!(v["must"][0]["key"], "session_id");
        assert_eq!(v["must"][0]["match"]["value"], "s1");
    }
}
