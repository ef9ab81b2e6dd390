//! Context compression under a token budget.
//!
//! Scores every message by position, role, keywords, and content
//! features, protects the head and tail of the conversation, optionally
//! summarises the low-importance middle through the LLM gateway, and
//! greedily selects the rest by score until the budget is filled.

mod compressor;

pub use compressor::{
    CompressionConfig, CompressionResult, ContextCompressor, MessageImportance, ScoredMessage,
};
