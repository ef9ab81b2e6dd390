//! Background session-title generation.
//!
//! Runs after the first turn of an untitled session, off the turn's
//! critical path. Failures are logged and swallowed.

use std::sync::Arc;

use axon_domain::message::Message;
use axon_domain::Result;
use axon_providers::{ChatRequest, LlmClient};

const MAX_TITLE_CHARS: usize = 50;

/// Ask the model for a short title describing the first user message.
pub async fn generate_title(llm: &Arc<dyn LlmClient>, first_message: &str) -> Result<String> {
    let prompt = format!(
        "Generate a very short title (at most 20 characters, no quotes) for a \
         conversation that starts with this message:\n\n{first_message}\n\nTitle:"
    );

    let response = llm
        .chat(ChatRequest {
            messages: vec![Message::user(prompt)],
            temperature: Some(0.3),
            max_tokens: Some(30),
            ..Default::default()
        })
        .await?;

    let title = response
        .content
        .unwrap_or_default()
        .trim()
        .trim_matches(['"', '\'', '`'])
        .lines()
        .next()
        .unwrap_or_default()
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect::<String>();

    Ok(title)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_providers::{ChunkStream, LlmResponse};

    struct TitleLlm(&'static str);

    #[async_trait::async_trait]
    impl LlmClient for TitleLlm {
        async fn chat(&self, _req: ChatRequest) -> Result<LlmResponse> {
            Ok(LlmResponse {
                content: Some(self.0.to_string()),
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
    async fn strips_quotes_and_newlines() {
        let llm: Arc<dyn LlmClient> = Arc::new(TitleLlm("\"Weather chat\"\nextra"));
        let title = generate_title(&llm, "what's the weather").await.unwrap();
        assert_eq!(title, "Weather chat");
    }

    #[tokio::test]
    async fn truncates_overlong_titles() {
        let llm: Arc<dyn LlmClient> = Arc::new(TitleLlm(
            "An exceedingly long and thoroughly unnecessary conversation title",
        ));
        let title = generate_title(&llm, "hi").await.unwrap();
        assert_eq!(title.chars().count(), MAX_TITLE_CHARS);
    }
}
