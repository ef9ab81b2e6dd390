//! OpenAI-wire adapter.
//!
//! Serves every provider that speaks the chat-completions contract:
//! OpenAI itself plus DashScope, DeepSeek, Volcengine, and ZhipuAI
//! compatible-mode endpoints. DeepSeek extensions handled here:
//! `reasoning_content` on deltas/messages and message-level
//! `cache_control` markers.

use serde_json::Value;

use axon_domain::message::{Role, ToolCall};
use axon_domain::stream::{BoxStream, Usage};
use axon_domain::{Error, Result};

use crate::routing::ProviderKind;
use crate::traits::{LlmResponse, ProviderAdapter, ProviderRequest, ShapedMessage, StreamEvent};
use crate::util::{classify_http_error, from_reqwest};

pub(crate) struct OpenAiCompatAdapter {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(
        kind: ProviderKind,
        base_url: &str,
        api_key: String,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str, extra: &[(String, String)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");
        for (name, value) in extra {
            builder = builder.header(name, value);
        }
        builder
    }

    fn build_chat_body(&self, req: &ProviderRequest, stream: bool) -> Value {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| shaped_to_openai(m, self.kind))
            .collect();

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "temperature": req.temperature,
            "max_tokens": req.max_tokens,
            "stream": stream,
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(|t| t.to_openai()).collect();
            body["tools"] = Value::Array(tools);
            if let Some(choice) = &req.tool_choice {
                body["tool_choice"] = choice.clone();
            }
        }
        if stream {
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn shaped_to_openai(shaped: &ShapedMessage, kind: ProviderKind) -> Value {
    let msg = &shaped.message;
    let mut obj = match msg.role {
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
            "content": msg.content_str(),
        }),
        Role::Assistant => {
            let mut v = serde_json::json!({
                "role": "assistant",
                "content": msg.content.clone(),
            });
            if let Some(calls) = &msg.tool_calls {
                let wire: Vec<Value> = calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": tc.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                v["tool_calls"] = Value::Array(wire);
            }
            if let Some(reasoning) = &msg.reasoning_content {
                v["reasoning_content"] = Value::String(reasoning.clone());
            }
            v
        }
        _ => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content_str(),
        }),
    };

    // DeepSeek takes cache_control at the message level, system only.
    if shaped.cache_marker && kind == ProviderKind::Deepseek && msg.role == Role::System {
        obj["cache_control"] = serde_json::json!({"type": "ephemeral"});
    }

    obj
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_chat_response(provider: &str, body: &Value) -> Result<LlmResponse> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
        .ok_or_else(|| Error::Provider {
            provider: provider.to_string(),
            message: "no choices in response".into(),
        })?;

    let message = choice.get("message").cloned().unwrap_or(Value::Null);

    let content = message
        .get("content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let reasoning_content = message
        .get("reasoning_content")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from);

    let tool_calls = parse_wire_tool_calls(&message);

    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .map(String::from);

    let usage = body.get("usage").and_then(parse_openai_usage);

    Ok(LlmResponse {
        content,
        reasoning_content,
        tool_calls,
        finish_reason,
        usage,
    })
}

fn parse_wire_tool_calls(message: &Value) -> Vec<ToolCall> {
    let arr = match message.get("tool_calls").and_then(|v| v.as_array()) {
        Some(a) => a,
        None => return Vec::new(),
    };
    arr.iter()
        .filter_map(|tc| {
            let id = tc.get("id")?.as_str()?.to_string();
            let func = tc.get("function")?;
            let name = func.get("name")?.as_str()?.to_string();
            let args_raw = func.get("arguments").and_then(|v| v.as_str()).unwrap_or("");
            Some(ToolCall {
                id,
                name,
                arguments: ToolCall::parse_arguments(args_raw),
            })
        })
        .collect()
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    let prompt = v.get("prompt_tokens")?.as_u64()?;
    let completion = v.get("completion_tokens").and_then(|c| c.as_u64())?;
    let total = v
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .unwrap_or(prompt + completion);

    // DeepSeek reports cache accounting under its own names; read both.
    let cache_read = v
        .get("cache_read_input_tokens")
        .or_else(|| v.get("prompt_cache_hit_tokens"))
        .and_then(|c| c.as_u64())
        .filter(|&c| c > 0);
    let cache_creation = v
        .get("cache_creation_input_tokens")
        .or_else(|| v.get("prompt_cache_miss_tokens"))
        .and_then(|c| c.as_u64())
        .filter(|&c| c > 0);

    Some(Usage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total,
        cache_read_input_tokens: cache_read,
        cache_creation_input_tokens: cache_creation,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_sse_data(data: &str) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return vec![Ok(StreamEvent::Done {
            usage: None,
            finish_reason: None,
        })];
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only trailing chunk (stream_options.include_usage).
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
            return vec![Ok(StreamEvent::Done {
                usage: Some(usage),
                finish_reason: None,
            })];
        }
        return Vec::new();
    };

    let mut events = Vec::new();
    let delta = choice.get("delta").cloned().unwrap_or(Value::Null);

    if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
        for tc in tc_arr {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                events.push(Ok(StreamEvent::ToolCallStarted {
                    index,
                    call_id: id.to_string(),
                    tool_name: name.to_string(),
                }));
            }

            if let Some(args) = tc
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
            {
                events.push(Ok(StreamEvent::ToolCallDelta {
                    index,
                    fragment: args.to_string(),
                }));
            }
        }
    }

    if let Some(text) = delta.get("reasoning_content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Thinking(text.to_string())));
        }
    }

    if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token(text.to_string())));
        }
    }

    if let Some(fr) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_openai_usage);
        events.push(Ok(StreamEvent::Done {
            usage,
            finish_reason: Some(fr.to_string()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn chat(&self, req: &ProviderRequest) -> Result<LlmResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, false);
        let provider = self.kind.name();

        tracing::debug!(provider, model = %req.model, "chat request");

        let resp = self
            .authed_post(&url, &req.extra_headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(provider, e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;

        if !status.is_success() {
            return Err(classify_http_error(provider, status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_chat_response(provider, &json)
    }

    async fn chat_stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(req, true);
        let provider = self.kind.name();

        tracing::debug!(provider, model = %req.model, "stream request");

        let resp = self
            .authed_post(&url, &req.extra_headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(provider, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;
            return Err(classify_http_error(provider, status.as_u16(), &text));
        }

        Ok(crate::sse::sse_response_stream(provider, resp, parse_sse_data))
    }

    async fn embeddings(&self, model: &str, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({ "model": model, "input": input });
        let provider = self.kind.name();

        let resp = self
            .authed_post(&url, &[])
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(provider, e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest(provider, e))?;
        if !status.is_success() {
            return Err(classify_http_error(provider, status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::Provider {
                provider: provider.to_string(),
                message: "missing 'data' array in embeddings response".into(),
            })?;

        Ok(data
            .iter()
            .filter_map(|item| {
                let embedding = item.get("embedding")?.as_array()?;
                Some(
                    embedding
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect(),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_domain::message::Message;

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let msg = Message::assistant_tool_calls(
            Some("thinking".into()),
            vec![ToolCall {
                id: "t1".into(),
                name: "list_dir".into(),
                arguments: serde_json::json!({"path": "/"}),
            }],
        );
        let v = shaped_to_openai(&ShapedMessage::plain(msg), ProviderKind::Openai);
        assert_eq!(v["tool_calls"][0]["function"]["name"], "list_dir");
        assert!(v["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn deepseek_marker_becomes_message_cache_control() {
        let shaped = ShapedMessage {
            message: Message::system("long system prompt"),
            cache_marker: true,
        };
        let v = shaped_to_openai(&shaped, ProviderKind::Deepseek);
        assert_eq!(v["cache_control"]["type"], "ephemeral");

        // The same marker is ignored on the generic OpenAI wire.
        let v2 = shaped_to_openai(&shaped, ProviderKind::Openai);
        assert!(v2.get("cache_control").is_none());
    }

    #[test]
    fn parses_response_with_reasoning_and_tools() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "content": "",
                    "reasoning_content": "I should list the directory",
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "list_dir", "arguments": "{\"path\": \"/\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });
        let r = parse_chat_response("deepseek", &body).unwrap();
        assert!(r.content.is_none());
        assert_eq!(r.reasoning_content.as_deref(), Some("I should list the directory"));
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].arguments["path"], "/");
        assert_eq!(r.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(r.usage.unwrap().total_tokens, 15);
    }

    #[test]
    fn malformed_tool_arguments_become_raw() {
        let body = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "run", "arguments": "{broken"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let r = parse_chat_response("openai", &body).unwrap();
        assert_eq!(r.tool_calls[0].arguments["raw"], "{broken");
    }

    #[test]
    fn deepseek_cache_fields_mapped() {
        let usage = parse_openai_usage(&serde_json::json!({
            "prompt_tokens": 100,
            "completion_tokens": 10,
            "total_tokens": 110,
            "prompt_cache_hit_tokens": 80,
        }))
        .unwrap();
        assert_eq!(usage.cache_read_input_tokens, Some(80));
        assert_eq!(usage.cache_creation_input_tokens, None);
    }

    #[test]
    fn sse_tool_call_assembly_events() {
        let start = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"ls"}}]}}]}"#,
        );
        assert!(matches!(
            start[0],
            Ok(StreamEvent::ToolCallStarted { index: 0, .. })
        ));

        let delta = parse_sse_data(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"pa"}}]}}]}"#,
        );
        assert!(matches!(
            &delta[0],
            Ok(StreamEvent::ToolCallDelta { index: 0, fragment }) if fragment == "{\"pa"
        ));
    }

    #[test]
    fn sse_finish_chunk_carries_reason() {
        let events = parse_sse_data(r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#);
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Done { finish_reason: Some(r), .. }) if r == "stop"
        ));
    }

    #[test]
    fn sse_usage_only_chunk() {
        let events = parse_sse_data(
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#,
        );
        assert!(matches!(
            &events[0],
            Ok(StreamEvent::Done { usage: Some(u), .. }) if u.total_tokens == 10
        ));
    }
}
