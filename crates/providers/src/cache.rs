//! Prompt-cache shaping and accounting.
//!
//! Anthropic and DeepSeek expose explicit cache breakpoints; OpenAI
//! caches automatically. Breakpoints are assigned to system messages
//! only, subject to a minimum length, and capped per provider. The
//! marker travels on [`ShapedMessage`]; adapters translate it to the
//! wire format.

use std::sync::atomic::{AtomicU64, Ordering};

use axon_domain::message::Message;
use axon_domain::stream::Usage;

use crate::routing::ProviderKind;
use crate::traits::ShapedMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The cache behaviour of one provider.
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub enabled: bool,
    /// The cached-read price as a fraction of the full price
    /// (0.1 = 90% discount).
    pub discount: f64,
    /// Whether breakpoint markers are added to requests. Providers with
    /// automatic caching are `enabled` but without markers.
    pub uses_marker: bool,
    /// Minimum content length (chars) for a message to get a marker.
    pub min_chars: usize,
    pub max_breakpoints: usize,
}

impl CachePolicy {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Anthropic => Self {
                enabled: true,
                discount: 0.1,
                uses_marker: true,
                min_chars: 4096,
                max_breakpoints: 4,
            },
            ProviderKind::Deepseek => Self {
                enabled: true,
                discount: 0.5,
                uses_marker: true,
                min_chars: 256,
                max_breakpoints: 1,
            },
            ProviderKind::Openai => Self {
                enabled: true,
                discount: 0.5,
                uses_marker: false,
                min_chars: 4096,
                max_breakpoints: 0,
            },
            ProviderKind::Dashscope | ProviderKind::Volcengine | ProviderKind::Zhipuai => Self {
                enabled: false,
                discount: 1.0,
                uses_marker: false,
                min_chars: 0,
                max_breakpoints: 0,
            },
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A point-in-time copy of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    /// Token-equivalents saved, estimated from the provider discount.
    pub saved_token_equivalents: u64,
    pub hit_rate: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Assigns breakpoint markers and keeps cache-hit accounting.
///
/// Counters are atomics: updates happen concurrently from every turn's
/// response handling.
#[derive(Default)]
pub struct PromptCacheManager {
    hits: AtomicU64,
    misses: AtomicU64,
    cache_read_tokens: AtomicU64,
    cache_creation_tokens: AtomicU64,
    saved_token_equivalents: AtomicU64,
}

impl PromptCacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap messages with cache markers per the provider policy.
    ///
    /// Only system messages receive markers, at most
    /// `policy.max_breakpoints`, and only when the content is at least
    /// `policy.min_chars` long.
    pub fn shape_messages(&self, messages: &[Message], kind: ProviderKind) -> Vec<ShapedMessage> {
        let policy = CachePolicy::for_provider(kind);
        if !policy.enabled || !policy.uses_marker {
            return messages
                .iter()
                .cloned()
                .map(ShapedMessage::plain)
                .collect();
        }

        let mut used = 0usize;
        messages
            .iter()
            .cloned()
            .map(|message| {
                let eligible = message.role == axon_domain::message::Role::System
                    && used < policy.max_breakpoints
                    && message.content_str().len() >= policy.min_chars;
                if eligible {
                    used += 1;
                    tracing::debug!(
                        provider = kind.name(),
                        breakpoint = used,
                        max = policy.max_breakpoints,
                        chars = message.content_str().len(),
                        "cache breakpoint assigned to system message"
                    );
                    ShapedMessage {
                        message,
                        cache_marker: true,
                    }
                } else {
                    ShapedMessage::plain(message)
                }
            })
            .collect()
    }

    /// Record cache accounting from a response's usage.
    pub fn record(&self, usage: &Usage, kind: ProviderKind) {
        let policy = CachePolicy::for_provider(kind);
        let read = usage.cache_read_input_tokens.unwrap_or(0);
        let created = usage.cache_creation_input_tokens.unwrap_or(0);

        if read > 0 {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.cache_read_tokens.fetch_add(read, Ordering::Relaxed);
            let saved = (read as f64 * (1.0 - policy.discount)) as u64;
            self.saved_token_equivalents
                .fetch_add(saved, Ordering::Relaxed);
            tracing::info!(
                provider = kind.name(),
                cache_read = read,
                saved,
                "prompt cache hit"
            );
        } else if created > 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.cache_creation_tokens
                .fetch_add(created, Ordering::Relaxed);
            tracing::info!(
                provider = kind.name(),
                cache_creation = created,
                "prompt cache miss, cache created"
            );
        }
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            cache_read_tokens: self.cache_read_tokens.load(Ordering::Relaxed),
            cache_creation_tokens: self.cache_creation_tokens.load(Ordering::Relaxed),
            saved_token_equivalents: self.saved_token_equivalents.load(Ordering::Relaxed),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.cache_read_tokens.store(0, Ordering::Relaxed);
        self.cache_creation_tokens.store(0, Ordering::Relaxed);
        self.saved_token_equivalents.store(0, Ordering::Relaxed);
    }
}
