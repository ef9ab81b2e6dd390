//! Multi-provider LLM gateway.
//!
//! The [`Gateway`] routes a model name to a provider adapter (OpenAI,
//! Anthropic, DashScope, DeepSeek, Volcengine, ZhipuAI), clamps
//! `max_tokens` to the provider ceiling, applies prompt-cache shaping,
//! and normalises every response into plain [`LlmResponse`] /
//! [`StreamChunk`] records. Consumers reach it through the [`LlmClient`]
//! trait so tests can substitute a scripted fake.

mod anthropic;
pub mod cache;
pub mod config;
mod gateway;
mod openai_compat;
pub mod routing;
mod sse;
pub mod traits;
mod util;

pub use cache::{CacheStatsSnapshot, PromptCacheManager};
pub use config::{GatewayConfig, ProviderCredentials};
pub use gateway::Gateway;
pub use routing::ProviderKind;
pub use traits::{ChatRequest, ChunkStream, LlmClient, LlmResponse, ShapedMessage, StreamChunk};
