//! The provider-neutral gateway facade.
//!
//! Routes each request to a provider adapter, clamps `max_tokens`,
//! applies model-specific message preprocessing and prompt-cache
//! shaping, normalises responses, accumulates streaming tool-call
//! fragments, and keeps cache accounting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;

use axon_domain::message::{Message, Role, ToolCall};
use axon_domain::{Error, Result};

use crate::anthropic::AnthropicAdapter;
use crate::cache::{CachePolicy, CacheStatsSnapshot, PromptCacheManager};
use crate::config::GatewayConfig;
use crate::openai_compat::OpenAiCompatAdapter;
use crate::routing::{clamp_max_tokens, is_deepseek_reasoner, ProviderKind};
use crate::traits::{
    ChatRequest, ChunkStream, LlmClient, LlmResponse, ProviderAdapter, ProviderRequest,
    StreamChunk, StreamEvent,
};

const ANTHROPIC_CACHE_BETA: &str = "prompt-caching-2024-07-31";

pub struct Gateway {
    config: GatewayConfig,
    cache: Arc<PromptCacheManager>,
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl Gateway {
    /// Build the gateway, instantiating an adapter for every provider
    /// with a configured key. Providers without keys are simply absent;
    /// routing to them fails with `NoKeyConfigured`.
    pub fn new(config: GatewayConfig) -> Self {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

        for kind in ProviderKind::all() {
            let creds = config.credentials(kind);
            let Some(key) = creds.api_key.clone().filter(|k| !k.is_empty()) else {
                continue;
            };
            let adapter: Result<Arc<dyn ProviderAdapter>> = match kind {
                ProviderKind::Anthropic => {
                    AnthropicAdapter::new(&creds.api_base, key, config.request_timeout_secs)
                        .map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>)
                }
                _ => OpenAiCompatAdapter::new(
                    kind,
                    &creds.api_base,
                    key,
                    config.request_timeout_secs,
                )
                .map(|a| Arc::new(a) as Arc<dyn ProviderAdapter>),
            };
            match adapter {
                Ok(adapter) => {
                    tracing::info!(provider = kind.name(), "registered LLM provider");
                    adapters.insert(kind, adapter);
                }
                Err(e) => {
                    tracing::warn!(
                        provider = kind.name(),
                        error = %e,
                        "failed to initialize provider adapter, skipping"
                    );
                }
            }
        }

        Self {
            config,
            cache: Arc::new(PromptCacheManager::new()),
            adapters,
        }
    }

    pub fn from_env() -> Self {
        Self::new(GatewayConfig::from_env())
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.snapshot()
    }

    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    pub fn embedding_dimension(&self) -> usize {
        self.config.embedding_dimension
    }

    /// Token-count estimate for budgeting; the model hint is accepted
    /// for call-site symmetry and ignored.
    pub fn count_tokens(&self, text: &str, _model: Option<&str>) -> usize {
        axon_domain::tokens::count(text)
    }

    // ── Request preparation ────────────────────────────────────────

    /// Route, clamp, preprocess, and shape a request.
    pub(crate) fn prepare(
        &self,
        req: &ChatRequest,
    ) -> Result<(ProviderKind, Arc<dyn ProviderAdapter>, ProviderRequest)> {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let kind = ProviderKind::from_model(&model);

        let adapter = self
            .adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NoKeyConfigured(kind.name().to_string()))?;

        // Volcengine addresses models by endpoint id, not name.
        let wire_model = if kind == ProviderKind::Volcengine {
            self.config
                .volcengine_chat_endpoint_id
                .clone()
                .unwrap_or(model.clone())
        } else {
            model.clone()
        };

        let max_tokens = clamp_max_tokens(kind, req.max_tokens.unwrap_or(4096));
        let temperature = req.temperature.unwrap_or(0.7);

        let messages = preprocess_messages(&model, &req.messages);
        let shaped = self.cache.shape_messages(&messages, kind);

        let mut extra_headers = req.extra_headers.clone();
        let policy = CachePolicy::for_provider(kind);
        if kind == ProviderKind::Anthropic && policy.enabled {
            extra_headers.push(("anthropic-beta".into(), ANTHROPIC_CACHE_BETA.into()));
        }

        Ok((
            kind,
            adapter,
            ProviderRequest {
                model: wire_model,
                messages: shaped,
                temperature,
                max_tokens,
                tools: req.tools.clone(),
                tool_choice: req.tool_choice.clone(),
                extra_headers,
            },
        ))
    }
}

/// Model-specific message fixes applied before shaping.
///
/// DeepSeek Reasoner rejects assistant messages that carry tool calls
/// without a `reasoning_content` field; fill it from `content` or "".
fn preprocess_messages(model: &str, messages: &[Message]) -> Vec<Message> {
    if !is_deepseek_reasoner(model) {
        return messages.to_vec();
    }
    messages
        .iter()
        .cloned()
        .map(|mut msg| {
            if msg.role == Role::Assistant
                && msg.has_tool_calls()
                && msg.reasoning_content.is_none()
            {
                msg.reasoning_content = Some(msg.content.clone().unwrap_or_default());
            }
            msg
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Streaming assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-index tool-call assembly buffer.
#[derive(Default)]
struct ToolCallBuffers {
    by_index: BTreeMap<u64, (String, String, String)>,
}

impl ToolCallBuffers {
    fn start(&mut self, index: u64, call_id: String, name: String) {
        self.by_index.insert(index, (call_id, name, String::new()));
    }

    fn append(&mut self, index: u64, fragment: &str) {
        if let Some((_, _, args)) = self.by_index.get_mut(&index) {
            args.push_str(fragment);
        }
    }

    fn finalize(&mut self) -> Vec<ToolCall> {
        std::mem::take(&mut self.by_index)
            .into_values()
            .map(|(id, name, args)| ToolCall {
                id,
                name,
                arguments: ToolCall::parse_arguments(&args),
            })
            .collect()
    }
}

#[async_trait]
impl LlmClient for Gateway {
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse> {
        let (kind, adapter, provider_req) = self.prepare(&req)?;
        let response = adapter.chat(&provider_req).await?;
        if let Some(usage) = &response.usage {
            self.cache.record(usage, kind);
        }
        Ok(response)
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream> {
        let (kind, adapter, provider_req) = self.prepare(&req)?;
        let mut inner = adapter.chat_stream(&provider_req).await?;
        let cache = Arc::clone(&self.cache);

        let stream = async_stream::stream! {
            let mut buffers = ToolCallBuffers::default();
            let mut finish_reason: Option<String> = None;
            let mut usage: Option<axon_domain::stream::Usage> = None;

            while let Some(event) = inner.next().await {
                match event {
                    Ok(StreamEvent::Token(text)) => {
                        yield Ok(StreamChunk {
                            content: Some(text),
                            ..Default::default()
                        });
                    }
                    Ok(StreamEvent::Thinking(text)) => {
                        yield Ok(StreamChunk {
                            reasoning_content: Some(text),
                            ..Default::default()
                        });
                    }
                    Ok(StreamEvent::ToolCallStarted { index, call_id, tool_name }) => {
                        buffers.start(index, call_id, tool_name);
                    }
                    Ok(StreamEvent::ToolCallDelta { index, fragment }) => {
                        buffers.append(index, &fragment);
                    }
                    Ok(StreamEvent::Done { usage: u, finish_reason: fr }) => {
                        // Providers may emit several terminal markers
                        // (finish chunk, usage-only chunk, [DONE]);
                        // merge them and emit once at stream end.
                        if u.is_some() {
                            usage = u;
                        }
                        if fr.is_some() {
                            finish_reason = fr;
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let tool_calls = buffers.finalize();
            if let Some(u) = &usage {
                cache.record(u, kind);
            }
            let finish_reason = finish_reason.or_else(|| {
                Some(if tool_calls.is_empty() {
                    "stop".to_string()
                } else {
                    "tool_calls".to_string()
                })
            });
            yield Ok(StreamChunk {
                content: None,
                reasoning_content: None,
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                finish_reason,
                usage,
            });
        };

        Ok(Box::pin(stream))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other("embedding response was empty".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.config.embedding_model.clone();
        let kind = embedding_provider(&model);
        let adapter = self
            .adapters
            .get(&kind)
            .cloned()
            .ok_or_else(|| Error::NoKeyConfigured(kind.name().to_string()))?;
        adapter.embeddings(&model, texts).await
    }
}

/// Which provider serves a given embedding model.
fn embedding_provider(model: &str) -> ProviderKind {
    let m = model.to_ascii_lowercase();
    if m.contains("doubao-embedding") {
        ProviderKind::Volcengine
    } else if m.contains("text-embedding-v") {
        ProviderKind::Dashscope
    } else {
        ProviderKind::Openai
    }
}
