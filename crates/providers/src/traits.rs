use async_trait::async_trait;
use serde_json::Value;

use axon_domain::message::{Message, ToolCall, ToolDefinition};
use axon_domain::stream::{BoxStream, Usage};
use axon_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send.
    pub messages: Vec<Message>,
    /// Model identifier. `None` uses the gateway's default model.
    pub model: Option<String>,
    /// Sampling temperature (0.0 – 2.0).
    pub temperature: Option<f32>,
    /// Maximum response tokens; clamped to the provider's ceiling.
    pub max_tokens: Option<u32>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Tool choice strategy ("auto", "none", or a function spec).
    pub tool_choice: Option<Value>,
    /// Extra HTTP headers forwarded to the provider.
    pub extra_headers: Vec<(String, String)>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }
}

/// A normalised, provider-free chat response.
///
/// Adapters convert wire objects into this record before anything else
/// sees them; no provider-specific structure escapes.
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    /// Independent reasoning channel (DeepSeek Reasoner and friends).
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

/// One chunk of a streaming response.
///
/// Tool-call arguments arrive as partial JSON fragments; the gateway
/// accumulates them internally and emits the complete tool-call list on
/// the finish chunk only.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// A message plus its prompt-cache breakpoint flag.
///
/// The cache policy sets the marker; provider adapters translate it into
/// their wire format (content-block `cache_control` for Anthropic,
/// message-level `cache_control` for DeepSeek, nothing for providers
/// with automatic caching).
#[derive(Debug, Clone)]
pub struct ShapedMessage {
    pub message: Message,
    pub cache_marker: bool,
}

impl ShapedMessage {
    pub fn plain(message: Message) -> Self {
        Self {
            message,
            cache_marker: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public gateway trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the rest of the system knows about the LLM gateway.
///
/// The orchestrator, the memory ingestor, and the context compressor all
/// depend on this trait rather than the concrete [`crate::Gateway`], so
/// tests can substitute a scripted implementation.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and wait for the full response.
    async fn chat(&self, req: ChatRequest) -> Result<LlmResponse>;

    /// Send a chat completion request and stream the response.
    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal adapter contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The request handed to a provider adapter after routing, clamping,
/// preprocessing, and cache shaping.
#[derive(Debug, Clone)]
pub(crate) struct ProviderRequest {
    /// The wire-level model name (endpoint id for Volcengine).
    pub model: String,
    pub messages: Vec<ShapedMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: Option<Value>,
    pub extra_headers: Vec<(String, String)>,
}

/// Low-level events produced by adapter streams, assembled into
/// [`StreamChunk`]s by the gateway.
#[derive(Debug, Clone)]
pub(crate) enum StreamEvent {
    /// A text token chunk.
    Token(String),
    /// A reasoning-content chunk.
    Thinking(String),
    /// A tool call started at the given stream index.
    ToolCallStarted {
        index: u64,
        call_id: String,
        tool_name: String,
    },
    /// A partial JSON fragment of the arguments at the given index.
    ToolCallDelta { index: u64, fragment: String },
    /// Stream finished.
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
}

/// Trait every provider adapter implements.
#[async_trait]
pub(crate) trait ProviderAdapter: Send + Sync {
    async fn chat(&self, req: &ProviderRequest) -> Result<LlmResponse>;

    async fn chat_stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// Generate embeddings; only OpenAI-wire providers support this.
    async fn embeddings(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>>;
}
