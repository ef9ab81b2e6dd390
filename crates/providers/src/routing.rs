//! Model-name → provider routing and per-provider limits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Dashscope,
    Deepseek,
    Volcengine,
    Zhipuai,
}

impl ProviderKind {
    /// Route a model name to its provider by substring.
    ///
    /// Unknown names fall through to OpenAI, the most widely compatible
    /// wire format.
    pub fn from_model(model: &str) -> Self {
        let m = model.to_ascii_lowercase();
        if m.contains("claude") {
            ProviderKind::Anthropic
        } else if m.contains("qwen") {
            ProviderKind::Dashscope
        } else if m.contains("deepseek") {
            ProviderKind::Deepseek
        } else if m.contains("doubao") || m.contains("volcengine") {
            ProviderKind::Volcengine
        } else if m.contains("glm") {
            ProviderKind::Zhipuai
        } else {
            ProviderKind::Openai
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Openai => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Dashscope => "dashscope",
            ProviderKind::Deepseek => "deepseek",
            ProviderKind::Volcengine => "volcengine",
            ProviderKind::Zhipuai => "zhipuai",
        }
    }

    /// The provider's `max_tokens` ceiling. Requests above it are
    /// clamped with a warning; requests ≤ 0 are clamped to 1.
    pub fn max_tokens_ceiling(&self) -> u32 {
        match self {
            ProviderKind::Deepseek => 65536,
            ProviderKind::Dashscope | ProviderKind::Zhipuai | ProviderKind::Volcengine => 8192,
            ProviderKind::Openai | ProviderKind::Anthropic => 4096,
        }
    }

    pub fn all() -> [ProviderKind; 6] {
        [
            ProviderKind::Openai,
            ProviderKind::Anthropic,
            ProviderKind::Dashscope,
            ProviderKind::Deepseek,
            ProviderKind::Volcengine,
            ProviderKind::Zhipuai,
        ]
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Clamp a requested `max_tokens` to the provider's limits.
pub fn clamp_max_tokens(kind: ProviderKind, requested: u32) -> u32 {
    let ceiling = kind.max_tokens_ceiling();
    if requested > ceiling {
        tracing::warn!(
            provider = kind.name(),
            requested,
            ceiling,
            "max_tokens exceeds provider ceiling, clamping"
        );
        ceiling
    } else if requested == 0 {
        tracing::warn!(provider = kind.name(), "max_tokens below 1, clamping to 1");
        1
    } else {
        requested
    }
}

/// Whether the model is a DeepSeek reasoner variant, which requires a
/// `reasoning_content` field on assistant messages carrying tool calls.
pub fn is_deepseek_reasoner(model: &str) -> bool {
    let m = model.to_ascii_lowercase();
    m.contains("deepseek-reasoner") || (m.contains("deepseek") && m.contains("reasoner"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_substring() {
        assert_eq!(
            ProviderKind::from_model("claude-sonnet-4"),
            ProviderKind::Anthropic
        );
        assert_eq!(ProviderKind::from_model("gpt-4o"), ProviderKind::Openai);
        assert_eq!(ProviderKind::from_model("o1-mini"), ProviderKind::Openai);
        assert_eq!(
            ProviderKind::from_model("qwen-turbo"),
            ProviderKind::Dashscope
        );
        assert_eq!(
            ProviderKind::from_model("deepseek-chat"),
            ProviderKind::Deepseek
        );
        assert_eq!(
            ProviderKind::from_model("doubao-pro-32k"),
            ProviderKind::Volcengine
        );
        assert_eq!(ProviderKind::from_model("GLM-4"), ProviderKind::Zhipuai);
    }

    #[test]
    fn unknown_model_defaults_to_openai() {
        assert_eq!(
            ProviderKind::from_model("mystery-model"),
            ProviderKind::Openai
        );
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp_max_tokens(ProviderKind::Openai, 100_000), 4096);
        assert_eq!(clamp_max_tokens(ProviderKind::Deepseek, 100_000), 65536);
        assert_eq!(clamp_max_tokens(ProviderKind::Zhipuai, 100_000), 8192);
        assert_eq!(clamp_max_tokens(ProviderKind::Openai, 0), 1);
        assert_eq!(clamp_max_tokens(ProviderKind::Openai, 2048), 2048);
    }

    #[test]
    fn reasoner_detection() {
        assert!(is_deepseek_reasoner("deepseek-reasoner"));
        assert!(is_deepseek_reasoner("DeepSeek-R1-Reasoner"));
        assert!(!is_deepseek_reasoner("deepseek-chat"));
        assert!(!is_deepseek_reasoner("gpt-4o"));
    }
}
