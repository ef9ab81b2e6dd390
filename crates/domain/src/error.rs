/// Shared error type used across all Axon crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("no API key configured for provider {0}")]
    NoKeyConfigured(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("provider {0} rate limited")]
    RateLimited(String),

    #[error("provider {0} timed out")]
    ProviderTimeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool not available: {0}")]
    ToolNotAvailable(String),

    #[error("tool {0} requires approval")]
    ApprovalRequired(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("session limit: {0}")]
    SessionLimit(String),

    #[error("execution timed out: {0}")]
    ExecutionTimeout(String),

    #[error("cancelled")]
    Cancelled,

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a single retry with backoff is worth attempting.
    ///
    /// Only rate limits and timeouts qualify; everything else is either
    /// permanent (bad model, missing key) or already terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::RateLimited(_) | Error::ProviderTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::RateLimited("openai".into()).is_transient());
        assert!(Error::ProviderTimeout("deepseek".into()).is_transient());
        assert!(!Error::ModelNotFound("gpt-x".into()).is_transient());
        assert!(!Error::NoKeyConfigured("anthropic".into()).is_transient());
        assert!(!Error::Cancelled.is_transient());
    }

    #[test]
    fn display_includes_provider() {
        let e = Error::Provider {
            provider: "zhipuai".into(),
            message: "HTTP 500".into(),
        };
        assert_eq!(e.to_string(), "provider zhipuai: HTTP 500");
    }
}
