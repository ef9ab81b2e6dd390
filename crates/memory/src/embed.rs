//! Text embedding providers.

use std::sync::Arc;

use async_trait::async_trait;

use axon_domain::Result;
use axon_providers::LlmClient;

/// Produces dense embeddings for vector indexing and search.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Embeds through the LLM gateway's embeddings endpoint.
pub struct GatewayEmbedder {
    gateway: Arc<dyn LlmClient>,
    dimension: usize,
}

impl GatewayEmbedder {
    pub fn new(gateway: Arc<dyn LlmClient>, dimension: usize) -> Self {
        Self { gateway, dimension }
    }
}

#[async_trait]
impl Embedder for GatewayEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.gateway.embed(text).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic offline embedder: a feature-hashed bag of words,
/// L2-normalised. Not semantically deep, but stable, cheap, and good
/// enough for development and tests where no embedding API exists.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, word: &str) -> usize {
        // FNV-1a, stable across platforms and runs.
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in word.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.to_lowercase().split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }
            vector[self.bucket(word)] += 1.0;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
