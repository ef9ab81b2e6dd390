//! Gateway configuration, resolved from the environment.

use crate::routing::ProviderKind;

/// Credentials and endpoint for one provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub api_key: Option<String>,
    pub api_base: String,
}

impl ProviderCredentials {
    fn new(api_key: Option<String>, api_base: String) -> Self {
        Self { api_key, api_base }
    }

    pub fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Full gateway configuration.
///
/// `from_env` reads the documented environment variables; base URLs fall
/// back to each provider's public endpoint.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub default_model: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub openai: ProviderCredentials,
    pub anthropic: ProviderCredentials,
    pub dashscope: ProviderCredentials,
    pub deepseek: ProviderCredentials,
    pub volcengine: ProviderCredentials,
    pub zhipuai: ProviderCredentials,
    /// Volcengine requires an endpoint id in place of the model name.
    pub volcengine_chat_endpoint_id: Option<String>,
    pub volcengine_image_endpoint_id: Option<String>,
    /// Per-request timeout for provider HTTP calls, seconds.
    pub request_timeout_secs: u64,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            default_model: env_or("AXON_DEFAULT_MODEL", "deepseek-chat"),
            embedding_model: env_or("AXON_EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension: env_opt("AXON_EMBEDDING_DIMENSION")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1536),
            openai: ProviderCredentials::new(
                env_opt("OPENAI_API_KEY"),
                env_or("OPENAI_API_BASE", "https://api.openai.com/v1"),
            ),
            anthropic: ProviderCredentials::new(
                env_opt("ANTHROPIC_API_KEY"),
                "https://api.anthropic.com".into(),
            ),
            dashscope: ProviderCredentials::new(
                env_opt("DASHSCOPE_API_KEY"),
                env_or(
                    "DASHSCOPE_API_BASE",
                    "https://dashscope.aliyuncs.com/compatible-mode/v1",
                ),
            ),
            deepseek: ProviderCredentials::new(
                env_opt("DEEPSEEK_API_KEY"),
                env_or("DEEPSEEK_API_BASE", "https://api.deepseek.com/v1"),
            ),
            volcengine: ProviderCredentials::new(
                env_opt("VOLCENGINE_API_KEY"),
                env_or(
                    "VOLCENGINE_API_BASE",
                    "https://ark.cn-beijing.volces.com/api/v3",
                ),
            ),
            zhipuai: ProviderCredentials::new(
                env_opt("ZHIPUAI_API_KEY"),
                env_or("ZHIPUAI_API_BASE", "https://open.bigmodel.cn/api/paas/v4"),
            ),
            volcengine_chat_endpoint_id: env_opt("VOLCENGINE_CHAT_ENDPOINT_ID"),
            volcengine_image_endpoint_id: env_opt("VOLCENGINE_IMAGE_ENDPOINT_ID"),
            request_timeout_secs: 120,
        }
    }

    /// Credentials for a provider.
    pub fn credentials(&self, kind: ProviderKind) -> &ProviderCredentials {
        match kind {
            ProviderKind::Openai => &self.openai,
            ProviderKind::Anthropic => &self.anthropic,
            ProviderKind::Dashscope => &self.dashscope,
            ProviderKind::Deepseek => &self.deepseek,
            ProviderKind::Volcengine => &self.volcengine,
            ProviderKind::Zhipuai => &self.zhipuai,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_public_endpoints() {
        let cfg = GatewayConfig {
            default_model: "deepseek-chat".into(),
            embedding_model: "text-embedding-3-small".into(),
            embedding_dimension: 1536,
            openai: ProviderCredentials::new(None, "https://api.openai.com/v1".into()),
            anthropic: ProviderCredentials::new(None, "https://api.anthropic.com".into()),
            dashscope: ProviderCredentials::new(
                None,
                "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            ),
            deepseek: ProviderCredentials::new(None, "https://api.deepseek.com/v1".into()),
            volcengine: ProviderCredentials::new(
                None,
                "https://ark.cn-beijing.volces.com/api/v3".into(),
            ),
            zhipuai: ProviderCredentials::new(
                None,
                "https://open.bigmodel.cn/api/paas/v4".into(),
            ),
            volcengine_chat_endpoint_id: None,
            volcengine_image_endpoint_id: None,
            request_timeout_secs: 120,
        };
        assert!(!cfg.credentials(ProviderKind::Deepseek).has_key());
        assert_eq!(
            cfg.credentials(ProviderKind::Zhipuai).api_base,
            "https://open.bigmodel.cn/api/paas/v4"
        );
    }
}
