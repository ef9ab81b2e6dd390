//! SimpleMem ingestion and adaptive retrieval.
//!
//! Stage 1 slides a window over the conversation, filters windows by
//! information novelty, and asks a (small) model to distil each
//! surviving window into one memory atom. Stage 3 retrieves with a
//! hybrid of semantic search and per-session BM25, fused by reciprocal
//! rank. Stage 2 (consolidation) is a hook that currently only resets
//! the per-session counter.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use axon_domain::message::Message;
use axon_domain::{tokens, Memory, Result};
use axon_providers::{ChatRequest, LlmClient};

use crate::bm25::Bm25Index;
use crate::long_term::LongTermMemoryStore;

const ATOM_TYPE: &str = "simplemem_atom";
const RRF_K: f64 = 60.0;

const EXTRACTION_PROMPT: &str = r#"Extract the key information from the conversation. Return JSON:
{"summary": "one sentence summary", "entities": ["entity1", "entity2"], "importance": 5}
importance: 1-10, 10 most important"#;

#[derive(Debug, Clone)]
pub struct SimpleMemConfig {
    pub window_size: usize,
    pub window_stride: usize,
    pub novelty_threshold: f64,
    pub min_content_length: usize,
    pub k_min: usize,
    pub k_max: usize,
    pub complexity_threshold: f64,
    pub consolidation_interval: usize,
    /// A smaller/cheaper model for atom extraction; `None` uses the
    /// gateway default.
    pub extraction_model: Option<String>,
}

impl Default for SimpleMemConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            window_stride: 5,
            novelty_threshold: 0.35,
            min_content_length: 20,
            k_min: 3,
            k_max: 15,
            complexity_threshold: 0.5,
            consolidation_interval: 50,
            extraction_model: None,
        }
    }
}

/// One distilled unit of long-term memory; a window produces 0 or 1.
#[derive(Debug, Clone)]
pub struct MemoryAtom {
    pub id: String,
    pub content: String,
    pub entities: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub source_session: String,
    pub importance: f64,
    pub tokens: usize,
}

#[derive(Default)]
struct SessionIndex {
    bm25: Bm25Index,
    atom_count: usize,
}

pub struct SimpleMemIngestor {
    llm: Arc<dyn LlmClient>,
    store: Arc<LongTermMemoryStore>,
    config: SimpleMemConfig,
    entity_re: Regex,
    time_re: Regex,
    sessions: Mutex<HashMap<String, SessionIndex>>,
}

impl SimpleMemIngestor {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        store: Arc<LongTermMemoryStore>,
        config: SimpleMemConfig,
    ) -> Self {
        Self {
            llm,
            store,
            config,
            entity_re: Regex::new(r"\b[A-Z][a-z]+\b").expect("entity regex"),
            time_re: Regex::new(
                r"(?i)\b(yesterday|today|tomorrow|last week|last month|\d+\s*(?:years?|months?|weeks?|days?|hours?|minutes?|seconds?)(?:\s+ago)?)\b",
            )
            .expect("time regex"),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    // ── Stage 1: ingestion ─────────────────────────────────────────

    /// Slide a window over the conversation, extract atoms from
    /// novel windows, and persist them. Returns the extracted atoms.
    pub async fn process_and_store(
        &self,
        messages: &[Message],
        user_id: &str,
        session_id: &str,
    ) -> Result<Vec<MemoryAtom>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }

        let mut extracted = Vec::new();

        let mut start = 0;
        while start < messages.len() {
            let end = (start + self.config.window_size).min(messages.len());
            let window = &messages[start..end];
            start += self.config.window_stride;

            let novelty = self.novelty(window);
            if novelty < self.config.novelty_threshold {
                tracing::debug!(novelty, "skipping low-novelty window");
                continue;
            }

            let Some(atom) = self.extract_atom(window, session_id).await else {
                continue;
            };

            let mut metadata = Map::new();
            metadata.insert("atom_id".into(), Value::String(atom.id.clone()));
            metadata.insert(
                "entities".into(),
                Value::String(serde_json::to_string(&atom.entities)?),
            );
            metadata.insert("user_id".into(), Value::String(user_id.to_string()));
            metadata.insert(
                "timestamp".into(),
                Value::String(atom.timestamp.to_rfc3339()),
            );

            self.store
                .put_with_id(
                    session_id,
                    &atom.id,
                    ATOM_TYPE,
                    &atom.content,
                    atom.importance,
                    metadata,
                )
                .await?;

            self.index_atom(session_id, &atom.content).await;
            extracted.push(atom);
        }

        tracing::info!(
            session_id,
            messages = messages.len(),
            atoms = extracted.len(),
            "simplemem ingestion finished"
        );
        Ok(extracted)
    }

    async fn index_atom(&self, session_id: &str, content: &str) {
        let needs_consolidation = {
            let mut sessions = self.sessions.lock();
            let index = sessions.entry(session_id.to_string()).or_default();
            index.bm25.add_document(content);
            index.atom_count += 1;
            index.atom_count >= self.config.consolidation_interval
        };
        if needs_consolidation {
            self.consolidate(session_id).await;
        }
    }

    /// Consolidation hook (Stage 2). Merging is not implemented; the
    /// counter reset keeps the trigger cadence stable for when it is.
    async fn consolidate(&self, session_id: &str) {
        tracing::info!(session_id, "memory consolidation triggered");
        if let Some(index) = self.sessions.lock().get_mut(session_id) {
            index.atom_count = 0;
        }
    }

    /// Information novelty of a window:
    /// `0.4·unique_word_ratio + 0.6·min(1, unique_entities/10)`.
    fn novelty(&self, window: &[Message]) -> f64 {
        let content: String = window
            .iter()
            .filter_map(|m| m.content.as_deref())
            .collect::<Vec<_>>()
            .join(" ");
        if content.len() < self.config.min_content_length {
            return 0.0;
        }

        let words: Vec<String> = content
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        let unique: std::collections::HashSet<&String> = words.iter().collect();
        let unique_ratio = unique.len() as f64 / words.len().max(1) as f64;

        let entities: std::collections::HashSet<&str> = self
            .entity_re
            .find_iter(&content)
            .map(|m| m.as_str())
            .chain(self.time_re.find_iter(&content).map(|m| m.as_str()))
            .collect();
        let entity_score = (entities.len() as f64 / 10.0).min(1.0);

        unique_ratio * 0.4 + entity_score * 0.6
    }

    async fn extract_atom(&self, window: &[Message], session_id: &str) -> Option<MemoryAtom> {
        let full_content: String = window
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content_str()))
            .collect::<Vec<_>>()
            .join("\n");
        if full_content.len() < self.config.min_content_length {
            return None;
        }

        let truncated = truncate_chars(&full_content, 2000);
        let req = ChatRequest {
            messages: vec![
                Message::system(EXTRACTION_PROMPT),
                Message::user(truncated),
            ],
            model: self.config.extraction_model.clone(),
            temperature: Some(0.1),
            max_tokens: Some(200),
            ..Default::default()
        };

        let response = match self.llm.chat(req).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "atom extraction call failed");
                return None;
            }
        };

        let text = response.content.unwrap_or_default();
        let parsed = extract_json_object(&text)?;
        let summary = parsed.get("summary")?.as_str()?.to_string();
        if summary.is_empty() {
            return None;
        }
        let entities: Vec<String> = parsed
            .get("entities")
            .and_then(|e| e.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .take(10)
                    .collect()
            })
            .unwrap_or_default();
        let importance = parsed
            .get("importance")
            .and_then(|i| i.as_f64())
            .unwrap_or(5.0)
            .clamp(1.0, 10.0);

        Some(MemoryAtom {
            id: atom_id(session_id, &summary),
            tokens: tokens::count(&summary),
            content: summary,
            entities,
            timestamp: Utc::now(),
            source_session: session_id.to_string(),
            importance,
        })
    }

    // ── Stage 3: retrieval ─────────────────────────────────────────

    /// Hybrid retrieval with query-complexity-adaptive depth.
    pub async fn adaptive_retrieve(
        &self,
        session_id: &str,
        query: &str,
        k: Option<usize>,
    ) -> Result<Vec<Memory>> {
        let complexity = self.query_complexity(query);
        let k = k.unwrap_or_else(|| self.adaptive_k(complexity));
        tracing::debug!(complexity, k, "adaptive retrieval");

        let semantic = self
            .store
            .search(session_id, query, k, Some(ATOM_TYPE))
            .await?;

        let lexical: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .get(session_id)
                .map(|index| {
                    index
                        .bm25
                        .search(query, k)
                        .into_iter()
                        .filter_map(|(doc_idx, _)| {
                            index.bm25.document(doc_idx).map(String::from)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        Ok(fuse_rrf(semantic, &lexical, k, session_id))
    }

    /// Query complexity in `[0, 1]`.
    fn query_complexity(&self, query: &str) -> f64 {
        let mut score: f64 = 0.0;

        let word_count = query.split_whitespace().count();
        if word_count >= 15 {
            score += 0.3;
        } else if word_count >= 8 {
            score += 0.15;
        }

        let entity_count = self.entity_re.find_iter(query).count();
        score += (entity_count as f64 * 0.1).min(0.3);

        if self.time_re.is_match(query) {
            score += 0.2;
        }

        let lowered = query.to_lowercase();
        if ["why", "how", "what", "when", "because"]
            .iter()
            .any(|w| lowered.split_whitespace().any(|q| q.trim_matches(|c: char| !c.is_alphanumeric()) == *w))
        {
            score += 0.15;
        }

        score.min(1.0)
    }

    /// Interpolate `k` between `k_min` and `k_max` from complexity.
    fn adaptive_k(&self, complexity: f64) -> usize {
        if complexity < self.config.complexity_threshold {
            self.config.k_min
        } else {
            let ratio = (complexity - self.config.complexity_threshold)
                / (1.0 - self.config.complexity_threshold);
            self.config.k_min
                + (ratio * (self.config.k_max - self.config.k_min) as f64) as usize
        }
    }
}

/// Stable atom id: content hash of the session and summary prefix, so
/// re-running ingestion over the same window produces the same id.
fn atom_id(session_id: &str, summary: &str) -> String {
    let prefix = truncate_chars(summary, 50);
    let digest = Sha256::digest(format!("{session_id}:{prefix}").as_bytes());
    hex::encode(digest)[..12].to_string()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Pull the first JSON object out of a model reply.
fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()?
        .as_object()
        .cloned()
}

/// Reciprocal rank fusion keyed by content: a document at rank `r`
/// (0-based) contributes `1/(60 + r + 1)`; scores sum across lists.
/// Ties keep the semantic list's order.
fn fuse_rrf(semantic: Vec<Memory>, lexical: &[String], k: usize, session_id: &str) -> Vec<Memory> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut docs: HashMap<String, Memory> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (rank, memory) in semantic.into_iter().enumerate() {
        let key = memory.content.clone();
        *scores.entry(key.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        if !docs.contains_key(&key) {
            order.push(key.clone());
            docs.insert(key, memory);
        }
    }

    for (rank, content) in lexical.iter().enumerate() {
        *scores.entry(content.clone()).or_insert(0.0) += 1.0 / (RRF_K + rank as f64 + 1.0);
        if !docs.contains_key(content) {
            order.push(content.clone());
            // Lexical-only hit: the corpus stores summaries verbatim,
            // so synthesize the memory record around the content.
            docs.insert(
                content.clone(),
                Memory {
                    id: atom_id(session_id, content),
                    session_id: session_id.to_string(),
                    memory_type: ATOM_TYPE.to_string(),
                    content: content.clone(),
                    importance: 5.0,
                    created_at: Utc::now(),
                    metadata: Map::new(),
                    score: 0.0,
                },
            );
        }
    }

    let mut ranked: Vec<(usize, String)> = order.into_iter().enumerate().collect();
    ranked.sort_by(|(ia, a), (ib, b)| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(ia.cmp(ib))
    });

    ranked
        .into_iter()
        .take(k)
        .filter_map(|(_, key)| docs.remove(&key))
        .collect()
}
