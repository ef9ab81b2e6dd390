//! The smart context compressor.

use std::sync::Arc;

use regex::Regex;
use serde::Serialize;

use axon_domain::message::{Message, Role};
use axon_domain::{tokens, Result};
use axon_providers::{ChatRequest, LlmClient};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Default token budget when the caller does not pass one.
    pub max_history_tokens: usize,
    /// Protect the first N turns (2 messages each).
    pub protect_first_turns: usize,
    /// Protect the last N messages.
    pub protect_last_messages: usize,
    pub enable_summarization: bool,
    /// Summarise once usage crosses this fraction of the budget.
    pub summarization_threshold: f64,
    pub max_summary_tokens: u32,
    /// Penalise messages that overlap recalled memories.
    pub enable_memory_dedup: bool,
    pub memory_overlap_penalty: f64,
    pub critical_keywords: Vec<String>,
    pub high_keywords: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_history_tokens: 80_000,
            protect_first_turns: 2,
            protect_last_messages: 6,
            enable_summarization: true,
            summarization_threshold: 0.7,
            max_summary_tokens: 500,
            enable_memory_dedup: true,
            memory_overlap_penalty: 15.0,
            critical_keywords: [
                "decision", "decide", "final", "conclusion", "summary", "critical", "important",
                "must", "remember", "note",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            high_keywords: [
                "plan", "step", "reason", "because", "therefore", "suggest", "recommend",
                "choose", "prefer", "option",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scoring types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MessageImportance {
    Trivial = 1,
    Low = 2,
    Medium = 3,
    High = 4,
    Critical = 5,
}

#[derive(Debug, Clone)]
pub struct ScoredMessage {
    pub message: Message,
    pub importance: MessageImportance,
    pub score: f64,
    pub tokens: usize,
    /// Original position in the conversation.
    pub index: usize,
}

impl ScoredMessage {
    pub fn is_protected(&self) -> bool {
        self.importance == MessageImportance::Critical
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize)]
pub struct CompressionResult {
    #[serde(skip)]
    pub messages: Vec<Message>,
    pub summary: Option<String>,
    pub original_count: usize,
    pub compressed_count: usize,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub dropped_messages: usize,
    pub summarized_messages: usize,
    /// Set when a summary was wanted but the LLM call failed; the
    /// compression proceeded without it.
    pub degraded: bool,
    /// Indices (into the original list) of the kept messages.
    pub kept_indices: Vec<usize>,
}

impl CompressionResult {
    pub fn compression_ratio(&self) -> f64 {
        if self.original_tokens == 0 {
            0.0
        } else {
            1.0 - self.compressed_tokens as f64 / self.original_tokens as f64
        }
    }

    fn unchanged(messages: Vec<Message>, total_tokens: usize) -> Self {
        let count = messages.len();
        Self {
            kept_indices: (0..count).collect(),
            messages,
            summary: None,
            original_count: count,
            compressed_count: count,
            original_tokens: total_tokens,
            compressed_tokens: total_tokens,
            dropped_messages: 0,
            summarized_messages: 0,
            degraded: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compressor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ContextCompressor {
    config: CompressionConfig,
    /// Summary generation; without it compression is fully
    /// deterministic.
    llm: Option<Arc<dyn LlmClient>>,
    list_re: Regex,
}

impl ContextCompressor {
    pub fn new(config: CompressionConfig, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            config,
            llm,
            list_re: Regex::new(r"(?m)^\s*[-*\d]+[.)]\s").expect("list regex"),
        }
    }

    /// Compress `messages` to fit `budget_tokens` (together with the
    /// summary, when one is produced).
    pub async fn compress(
        &self,
        messages: &[Message],
        budget_tokens: Option<usize>,
        recalled_memories: &[String],
    ) -> Result<CompressionResult> {
        if messages.is_empty() {
            return Ok(CompressionResult::unchanged(Vec::new(), 0));
        }

        let budget = budget_tokens.unwrap_or(self.config.max_history_tokens);
        let original_tokens = tokens::count_messages(messages);

        if original_tokens <= budget {
            return Ok(CompressionResult::unchanged(
                messages.to_vec(),
                original_tokens,
            ));
        }

        let mut scored = self.score_messages(messages, recalled_memories);
        self.mark_protected_regions(&mut scored);

        let mut degraded = false;
        let mut summary = None;
        let mut summarized_count = 0;

        let threshold = (budget as f64 * self.config.summarization_threshold) as usize;
        if self.config.enable_summarization && self.llm.is_some() && original_tokens > threshold {
            match self.summarize_middle(&scored).await {
                Ok(Some((text, count))) => {
                    summary = Some(text);
                    summarized_count = count;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "summary generation failed, compressing without");
                    degraded = true;
                }
            }
        }

        let (kept, dropped_count) = self.select_messages(&scored, budget, summary.as_deref());

        let mut compressed_tokens: usize = kept.iter().map(|sm| sm.tokens).sum();
        if let Some(text) = &summary {
            compressed_tokens += tokens::count(text);
        }

        let kept_indices: Vec<usize> = kept.iter().map(|sm| sm.index).collect();
        let result = CompressionResult {
            messages: kept.into_iter().map(|sm| sm.message).collect(),
            summary,
            original_count: messages.len(),
            compressed_count: kept_indices.len(),
            original_tokens,
            compressed_tokens,
            dropped_messages: dropped_count,
            summarized_messages: summarized_count,
            degraded,
            kept_indices,
        };

        tracing::debug!(
            original = result.original_tokens,
            compressed = result.compressed_tokens,
            dropped = result.dropped_messages,
            ratio = result.compression_ratio(),
            "context compressed"
        );
        Ok(result)
    }

    /// The final prompt: the optional summary as a synthetic system
    /// message, then the kept messages in original order.
    pub fn build_compressed_context(&self, result: &CompressionResult) -> Vec<Message> {
        let mut context = Vec::with_capacity(result.messages.len() + 1);
        if let Some(summary) = &result.summary {
            context.push(Message::system(format!("[Conversation summary]\n{summary}")));
        }
        context.extend(result.messages.iter().cloned());
        context
    }

    // ── Scoring ────────────────────────────────────────────────────

    pub fn score_messages(
        &self,
        messages: &[Message],
        recalled_memories: &[String],
    ) -> Vec<ScoredMessage> {
        let total = messages.len();
        messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let mut score = self.base_score(message, index, total);

                if self.config.enable_memory_dedup && !recalled_memories.is_empty() {
                    let overlap = max_jaccard_overlap(message.content_str(), recalled_memories);
                    if overlap > 0.5 {
                        score -= self.config.memory_overlap_penalty * overlap;
                    }
                }

                ScoredMessage {
                    importance: score_to_importance(score),
                    score,
                    tokens: tokens::count_message(message),
                    index,
                    message: message.clone(),
                }
            })
            .collect()
    }

    fn base_score(&self, message: &Message, index: usize, total: usize) -> f64 {
        let mut score = 0.0;
        let content = message.content_str();
        let content_lower = content.to_lowercase();

        // Position.
        if index < 4 {
            score += 30.0;
        }
        if index + self.config.protect_last_messages >= total {
            score += 25.0;
        }

        // Role and tool involvement.
        match message.role {
            Role::User => score += 10.0,
            Role::Assistant => score += 8.0,
            _ => {}
        }
        if message.has_tool_calls() {
            score += 20.0;
        }
        if message.is_tool_result() {
            score += 15.0;
        }

        // Keywords, first match per class.
        if self
            .config
            .critical_keywords
            .iter()
            .any(|k| content_lower.contains(k))
        {
            score += 15.0;
        }
        if self
            .config
            .high_keywords
            .iter()
            .any(|k| content_lower.contains(k))
        {
            score += 8.0;
        }

        // Content features.
        if content.contains("```") {
            score += 12.0;
        }
        if self.list_re.is_match(content) {
            score += 8.0;
        }
        if content.contains('?') {
            score += 5.0;
        }

        // Length.
        if content.len() < 20 {
            score -= 10.0;
        } else if content.len() > 500 {
            score += 5.0;
        }

        score
    }

    fn mark_protected_regions(&self, scored: &mut [ScoredMessage]) {
        let total = scored.len();

        let protect_head = self.config.protect_first_turns * 2;
        for sm in scored.iter_mut().take(protect_head.min(total)) {
            if sm.importance < MessageImportance::Critical {
                sm.importance = MessageImportance::Critical;
            }
        }

        let tail_start = total.saturating_sub(self.config.protect_last_messages);
        for sm in scored.iter_mut().skip(tail_start) {
            if sm.importance < MessageImportance::High {
                sm.importance = MessageImportance::High;
            }
        }
    }

    // ── Summarisation ──────────────────────────────────────────────

    /// Summarise the low-importance middle section. Returns the
    /// summary text and the number of messages it covers, or `None`
    /// when there are too few candidates to bother.
    async fn summarize_middle(
        &self,
        scored: &[ScoredMessage],
    ) -> Result<Option<(String, usize)>> {
        let Some(llm) = &self.llm else {
            return Ok(None);
        };

        let head = self.config.protect_first_turns * 2;
        let tail_start = scored.len().saturating_sub(self.config.protect_last_messages);
        if head >= tail_start {
            return Ok(None);
        }

        let candidates: Vec<&ScoredMessage> = scored[head..tail_start]
            .iter()
            .filter(|sm| sm.importance <= MessageImportance::Medium)
            .collect();
        if candidates.len() < 3 {
            return Ok(None);
        }

        let conversation: String = candidates
            .iter()
            .map(|sm| {
                format!(
                    "{}: {}",
                    sm.message.role.as_str(),
                    if sm.message.content_str().is_empty() {
                        "[tool call]"
                    } else {
                        sm.message.content_str()
                    }
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = format!(
            "Summarise the key information from the following conversation, keeping:\n\
             1. important decisions and conclusions\n\
             2. the user's preferences and requirements\n\
             3. key data or facts\n\n\
             Conversation:\n{conversation}\n\n\
             Reply with a single paragraph of at most 200 words:"
        );

        let response = llm
            .chat(ChatRequest {
                messages: vec![Message::user(prompt)],
                max_tokens: Some(self.config.max_summary_tokens),
                temperature: Some(0.3),
                ..Default::default()
            })
            .await?;

        let text = response.content.unwrap_or_default();
        if text.is_empty() {
            return Ok(None);
        }
        Ok(Some((text, candidates.len())))
    }

    // ── Selection ──────────────────────────────────────────────────

    fn select_messages(
        &self,
        scored: &[ScoredMessage],
        budget: usize,
        summary: Option<&str>,
    ) -> (Vec<ScoredMessage>, usize) {
        // The summary's own tokens (plus its framing) come out of the
        // budget first.
        let available = summary
            .map(|s| budget.saturating_sub(tokens::count(s) + 50))
            .unwrap_or(budget);

        let mut must_keep: Vec<&ScoredMessage> = Vec::new();
        let mut optional: Vec<&ScoredMessage> = Vec::new();
        for sm in scored {
            if sm.importance >= MessageImportance::High {
                must_keep.push(sm);
            } else {
                optional.push(sm);
            }
        }

        let mut must_tokens: usize = must_keep.iter().map(|sm| sm.tokens).sum();
        if must_tokens > available {
            must_keep.retain(|sm| sm.is_protected());
            must_tokens = must_keep.iter().map(|sm| sm.tokens).sum();
        }

        let mut remaining = available.saturating_sub(must_tokens);
        optional.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.index.cmp(&b.index))
        });

        let mut selected: Vec<&ScoredMessage> = must_keep;
        for sm in optional {
            if sm.tokens <= remaining {
                remaining -= sm.tokens;
                selected.push(sm);
            }
        }

        selected.sort_by_key(|sm| sm.index);
        let dropped = scored.len() - selected.len();
        (selected.into_iter().cloned().collect(), dropped)
    }
}

fn score_to_importance(score: f64) -> MessageImportance {
    if score >= 50.0 {
        MessageImportance::Critical
    } else if score >= 35.0 {
        MessageImportance::High
    } else if score >= 20.0 {
        MessageImportance::Medium
    } else if score >= 10.0 {
        MessageImportance::Low
    } else {
        MessageImportance::Trivial
    }
}

/// Highest Jaccard similarity between the content's word set and any
/// memory's word set. Contents under 3 words are never deduplicated.
fn max_jaccard_overlap(content: &str, memories: &[String]) -> f64 {
    let content_words: std::collections::HashSet<String> = content
        .to_lowercase()
        .split_whitespace()
        .map(String::from)
        .collect();
    if content_words.len() < 3 {
        return 0.0;
    }

    let mut max_overlap: f64 = 0.0;
    for memory in memories {
        let memory_words: std::collections::HashSet<String> = memory
            .to_lowercase()
            .split_whitespace()
            .map(String::from)
            .collect();
        if memory_words.is_empty() {
            continue;
        }
        let intersection = content_words.intersection(&memory_words).count();
        let union = content_words.union(&memory_words).count();
        if union > 0 {
            max_overlap = max_overlap.max(intersection as f64 / union as f64);
        }
    }
    max_overlap
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_domain::message::ToolCall;
    use axon_providers::{ChunkStream, LlmResponse};
    use parking_lot::Mutex;

    fn compressor() -> ContextCompressor {
        ContextCompressor::new(CompressionConfig::default(), None)
    }

    /// ~`tokens` tokens of filler content.
    fn filler(tokens: usize) -> String {
        "word ".repeat(tokens * 4 / 5)
    }

    fn long_conversation(count: usize, tokens_each: usize) -> Vec<Message> {
        (0..count)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("message {i} {}", filler(tokens_each)))
                } else {
                    Message::assistant(format!("message {i} {}", filler(tokens_each)))
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn under_budget_is_untouched() {
        let c = compressor();
        let messages = long_conversation(4, 10);
        let result = c.compress(&messages, Some(100_000), &[]).await.unwrap();
        assert_eq!(result.compressed_count, 4);
        assert_eq!(result.dropped_messages, 0);
        assert_eq!(result.compression_ratio(), 0.0);
    }

    #[tokio::test]
    async fn budget_is_honoured_and_protected_regions_kept() {
        let c = compressor();
        let messages = long_conversation(100, 500);
        let budget = 20_000;
        let result = c.compress(&messages, Some(budget), &[]).await.unwrap();

        assert!(result.compressed_tokens <= budget);
        // First 4 and last 6 original messages survive.
        for i in 0..4 {
            assert!(result.kept_indices.contains(&i), "head message {i} dropped");
        }
        for i in 94..100 {
            assert!(result.kept_indices.contains(&i), "tail message {i} dropped");
        }
        assert!(result.compression_ratio() >= 0.5);
    }

    #[tokio::test]
    async fn deterministic_without_llm() {
        let c = compressor();
        let messages = long_conversation(60, 400);
        let a = c.compress(&messages, Some(8_000), &[]).await.unwrap();
        let b = c.compress(&messages, Some(8_000), &[]).await.unwrap();
        assert_eq!(a.kept_indices, b.kept_indices);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn empty_input() {
        let c = compressor();
        let result = c.compress(&[], Some(100), &[]).await.unwrap();
        assert!(result.messages.is_empty());
        assert_eq!(result.compression_ratio(), 0.0);
    }

    #[test]
    fn scoring_features() {
        let c = compressor();

        let code = Message::assistant(format!("{}\n```rust\nfn main() {{}}\n```", filler(20)));
        let plain = Message::assistant(filler(20));
        let scored = c.score_messages(&[code, plain], &[]);
        // Same position bonuses; the code block adds 12.
        assert!((scored[0].score - scored[1].score - 12.0).abs() < 1e-9);

        let tool_call_msg = Message::assistant_tool_calls(
            Some(filler(20)),
            vec![ToolCall {
                id: "t".into(),
                name: "ls".into(),
                arguments: serde_json::json!({}),
            }],
        );
        let scored = c.score_messages(&[plain_copy(&scored[1].message), tool_call_msg], &[]);
        assert!((scored[1].score - scored[0].score - 20.0).abs() < 1e-9);
    }

    fn plain_copy(m: &Message) -> Message {
        m.clone()
    }

    #[test]
    fn list_detection_requires_delimiter() {
        let c = compressor();

        // Numbered and dotted-dash lists score; bare bullets do not.
        let numbered = Message::assistant(format!("{}\n1. first\n2. second", filler(20)));
        let dashed = Message::assistant(format!("{}\n- item one\n- item two", filler(20)));
        let plain = Message::assistant(filler(20));

        let scored = c.score_messages(&[plain, numbered, dashed], &[]);
        // All three share the same position/role bonuses (total 3,
        // indices 0..2 all within head and tail windows).
        assert!((scored[1].score - scored[0].score - 8.0).abs() < 1e-9);
        assert!((scored[2].score - scored[0].score).abs() < 1e-9);
    }

    #[test]
    fn keyword_classes_score_once_each() {
        let c = compressor();
        let msg = Message::user(format!(
            "the final decision is important, we must remember the plan {}",
            filler(10)
        ));
        let base = Message::user(filler(13));
        let scored = c.score_messages(&[base, msg], &[]);
        // +15 critical (once) +8 high (once), both lists have several matches.
        assert!((scored[1].score - scored[0].score - 23.0).abs() < 1e-9);
    }

    #[test]
    fn short_messages_penalised() {
        let c = compressor();
        let scored = c.score_messages(&[Message::user("ok")], &[]);
        // +30 position, +25 tail, +10 user, -10 short.
        assert!((scored[0].score - 55.0).abs() < 1e-9);
    }

    #[test]
    fn memory_overlap_penalty_applies() {
        let c = compressor();
        let content = "the deployment target is berlin cluster seven";
        let memories = vec![content.to_string()];
        let without = c.score_messages(&[Message::user(content)], &[]);
        let with = c.score_messages(&[Message::user(content)], &memories);
        // Identical sets: overlap 1.0, penalty 15.
        assert!((without[0].score - with[0].score - 15.0).abs() < 1e-9);
    }

    #[test]
    fn promotions_mark_head_critical_and_tail_high() {
        let c = compressor();
        let messages = long_conversation(20, 5);
        let mut scored = c.score_messages(&messages, &[]);
        c.mark_protected_regions(&mut scored);

        for sm in &scored[..4] {
            assert_eq!(sm.importance, MessageImportance::Critical);
        }
        for sm in &scored[14..] {
            assert!(sm.importance >= MessageImportance::High);
        }
    }

    // ── Summary path ───────────────────────────────────────────────

    struct SummaryLlm {
        fail: bool,
        calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl LlmClient for SummaryLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse> {
            *self.calls.lock() += 1;
            if self.fail {
                return Err(axon_domain::Error::ProviderTimeout("openai".into()));
            }
            Ok(LlmResponse {
                content: Some("The user configured the cluster and chose Berlin.".into()),
                ..Default::default()
            })
        }

        async fn chat_stream(&self, _req: ChatRequest) -> Result<ChunkStream> {
            unimplemented!()
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            unimplemented!()
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn summary_is_prepended_as_system_message() {
        let llm = Arc::new(SummaryLlm {
            fail: false,
            calls: Mutex::new(0),
        });
        let c = ContextCompressor::new(CompressionConfig::default(), Some(llm.clone()));
        let messages = long_conversation(60, 400);
        let result = c.compress(&messages, Some(8_000), &[]).await.unwrap();

        assert!(result.summary.is_some());
        assert!(result.summarized_messages >= 3);
        assert!(!result.degraded);
        assert_eq!(*llm.calls.lock(), 1);
        assert!(result.compressed_tokens <= 8_000);

        let context = c.build_compressed_context(&result);
        assert_eq!(context[0].role, Role::System);
        assert!(context[0].content_str().starts_with("[Conversation summary]"));
    }

    #[tokio::test]
    async fn summary_failure_degrades_gracefully() {
        let llm = Arc::new(SummaryLlm {
            fail: true,
            calls: Mutex::new(0),
        });
        let c = ContextCompressor::new(CompressionConfig::default(), Some(llm));
        let messages = long_conversation(60, 400);
        let result = c.compress(&messages, Some(8_000), &[]).await.unwrap();

        assert!(result.summary.is_none());
        assert!(result.degraded);
        assert!(result.compressed_tokens <= 8_000);
    }
}
