//! Shared utilities for provider adapters.

use axon_domain::Error;

/// Convert a [`reqwest::Error`] into the domain error, classifying
/// timeouts so the retry policy can see them.
pub(crate) fn from_reqwest(provider: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::ProviderTimeout(provider.to_string())
    } else {
        Error::Http(e.to_string())
    }
}

/// Map a non-success HTTP response to the error taxonomy.
pub(crate) fn classify_http_error(provider: &str, status: u16, body: &str) -> Error {
    if status == 429 {
        return Error::RateLimited(provider.to_string());
    }
    let lowered = body.to_ascii_lowercase();
    if status == 404 || lowered.contains("model not exist") || lowered.contains("model_not_found") {
        return Error::ModelNotFound(format!("{provider}: HTTP {status} - {body}"));
    }
    Error::Provider {
        provider: provider.to_string(),
        message: format!("HTTP {status} - {body}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_maps_to_transient() {
        let e = classify_http_error("openai", 429, "slow down");
        assert!(e.is_transient());
    }

    #[test]
    fn model_not_found_detected_in_body() {
        let e = classify_http_error("deepseek", 400, "Model Not Exist");
        assert!(matches!(e, Error::ModelNotFound(_)));
    }

    #[test]
    fn other_statuses_are_provider_errors() {
        let e = classify_http_error("zhipuai", 500, "oops");
        assert!(matches!(e, Error::Provider { .. }));
        assert!(!e.is_transient());
    }
}
