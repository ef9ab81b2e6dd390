//! Anthropic-native adapter.
//!
//! Implements the Messages API: system prompts travel in the top-level
//! `system` field (as content blocks carrying `cache_control` when a
//! breakpoint is set), tool calls are `tool_use` content blocks, tool
//! results are user messages with `tool_result` blocks, and
//! `stop_reason` is mapped onto the OpenAI-style finish reasons the
//! rest of the core understands.

use serde_json::Value;

use axon_domain::message::{Role, ToolCall};
use axon_domain::stream::{BoxStream, Usage};
use axon_domain::{Error, Result};

use crate::traits::{LlmResponse, ProviderAdapter, ProviderRequest, ShapedMessage, StreamEvent};
use crate::util::{classify_http_error, from_reqwest};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

pub(crate) struct AnthropicAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(base_url: &str, api_key: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authed_post(&self, url: &str, extra: &[(String, String)]) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");
        for (name, value) in extra {
            builder = builder.header(name, value);
        }
        builder
    }

    fn build_messages_body(&self, req: &ProviderRequest, stream: bool) -> Value {
        let (system, messages) = split_system(&req.messages);

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "temperature": req.temperature,
            "stream": stream,
        });

        if let Some(system) = system {
            body["system"] = system;
        }

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lift system messages out into the top-level `system` value and
/// convert the rest into Anthropic messages.
///
/// Without cache markers the system is a plain string; with any marker
/// it becomes a content-blocks array where marked blocks carry
/// `cache_control`.
fn split_system(messages: &[ShapedMessage]) -> (Option<Value>, Vec<Value>) {
    let mut system_blocks: Vec<Value> = Vec::new();
    let mut any_marker = false;
    let mut api_messages: Vec<Value> = Vec::new();

    for shaped in messages {
        let msg = &shaped.message;
        match msg.role {
            Role::System => {
                let mut block = serde_json::json!({
                    "type": "text",
                    "text": msg.content_str(),
                });
                if shaped.cache_marker {
                    any_marker = true;
                    block["cache_control"] = serde_json::json!({"type": "ephemeral"});
                }
                system_blocks.push(block);
            }
            Role::User => {
                api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": msg.content_str(),
                }));
            }
            Role::Assistant => {
                api_messages.push(assistant_to_anthropic(msg));
            }
            Role::Tool => {
                // Tool results are user messages with tool_result blocks.
                api_messages.push(serde_json::json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                        "content": msg.content_str(),
                    }],
                }));
            }
        }
    }

    let system = if system_blocks.is_empty() {
        None
    } else if any_marker {
        Some(Value::Array(system_blocks))
    } else {
        let joined = system_blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Some(Value::String(joined))
    };

    (system, api_messages)
}

fn assistant_to_anthropic(msg: &axon_domain::message::Message) -> Value {
    let mut blocks: Vec<Value> = Vec::new();
    if let Some(content) = &msg.content {
        if !content.is_empty() {
            blocks.push(serde_json::json!({"type": "text", "text": content}));
        }
    }
    if let Some(calls) = &msg.tool_calls {
        for tc in calls {
            blocks.push(serde_json::json!({
                "type": "tool_use",
                "id": tc.id,
                "name": tc.name,
                "input": tc.arguments,
            }));
        }
    }
    if blocks.is_empty() {
        blocks.push(serde_json::json!({"type": "text", "text": ""}));
    }
    serde_json::json!({"role": "assistant", "content": blocks})
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response deserialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn map_stop_reason(reason: &str) -> String {
    match reason {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

fn parse_anthropic_response(body: &Value) -> Result<LlmResponse> {
    let empty = Vec::new();
    let content_arr = body
        .get("content")
        .and_then(|v| v.as_array())
        .unwrap_or(&empty);

    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in content_arr {
        match block.get("type").and_then(|v| v.as_str()).unwrap_or("") {
            "text" => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text_parts.push(t.to_string());
                }
            }
            "tool_use" => {
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    arguments: block
                        .get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                });
            }
            _ => {}
        }
    }

    let finish_reason = body
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .map(map_stop_reason);

    let usage = body.get("usage").and_then(parse_anthropic_usage);

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join(""))
    };

    Ok(LlmResponse {
        content,
        reasoning_content: None,
        tool_calls,
        finish_reason,
        usage,
    })
}

fn parse_anthropic_usage(v: &Value) -> Option<Usage> {
    let input = v.get("input_tokens")?.as_u64()?;
    let output = v.get("output_tokens").and_then(|o| o.as_u64()).unwrap_or(0);
    Some(Usage {
        prompt_tokens: input,
        completion_tokens: output,
        total_tokens: input + output,
        cache_read_input_tokens: v
            .get("cache_read_input_tokens")
            .and_then(|c| c.as_u64())
            .filter(|&c| c > 0),
        cache_creation_input_tokens: v
            .get("cache_creation_input_tokens")
            .and_then(|c| c.as_u64())
            .filter(|&c| c > 0),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutable assembly state carried across SSE payloads.
#[derive(Default)]
struct StreamState {
    usage: Option<Usage>,
    done_emitted: bool,
}

fn parse_anthropic_sse(data: &str, state: &mut StreamState) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();
    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_anthropic_usage);
            }
        }

        "content_block_start" => {
            let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        index,
                        call_id: block
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or("")
                            .to_string(),
                        tool_name: block
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("")
                            .to_string(),
                    }));
                }
            }
        }

        "content_block_delta" => {
            let index = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::Token(text.to_string())));
                            }
                        }
                    }
                    "thinking_delta" => {
                        if let Some(text) = delta.get("thinking").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::Thinking(text.to_string())));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) = delta.get("partial_json").and_then(|p| p.as_str()) {
                            events.push(Ok(StreamEvent::ToolCallDelta {
                                index,
                                fragment: partial.to_string(),
                            }));
                        }
                    }
                    _ => {}
                }
            }
        }

        "message_delta" => {
            if let Some(output) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|o| o.as_u64())
            {
                if let Some(usage) = &mut state.usage {
                    usage.completion_tokens = output;
                    usage.total_tokens = usage.prompt_tokens + output;
                }
            }
            let stop_reason = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|s| s.as_str())
                .map(map_stop_reason);
            if stop_reason.is_some() {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: stop_reason,
                }));
            }
        }

        "message_stop" => {
            if !state.done_emitted {
                state.done_emitted = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    finish_reason: Some("stop".into()),
                }));
            }
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string();
            events.push(Err(Error::Provider {
                provider: PROVIDER.into(),
                message,
            }));
        }

        // ping and unknown event types.
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ProviderAdapter for AnthropicAdapter {
    async fn chat(&self, req: &ProviderRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, false);

        tracing::debug!(provider = PROVIDER, model = %req.model, "chat request");

        let resp = self
            .authed_post(&url, &req.extra_headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(PROVIDER, e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| from_reqwest(PROVIDER, e))?;

        if !status.is_success() {
            return Err(classify_http_error(PROVIDER, status.as_u16(), &text));
        }

        let json: Value = serde_json::from_str(&text)?;
        parse_anthropic_response(&json)
    }

    async fn chat_stream(
        &self,
        req: &ProviderRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_messages_body(req, true);

        tracing::debug!(provider = PROVIDER, model = %req.model, "stream request");

        let resp = self
            .authed_post(&url, &req.extra_headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| from_reqwest(PROVIDER, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.map_err(|e| from_reqwest(PROVIDER, e))?;
            return Err(classify_http_error(PROVIDER, status.as_u16(), &text));
        }

        let mut state = StreamState::default();
        Ok(crate::sse::sse_response_stream(PROVIDER, resp, move |data| {
            parse_anthropic_sse(data, &mut state)
        }))
    }

    async fn embeddings(&self, _model: &str, _input: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::Provider {
            provider: PROVIDER.into(),
            message: "Anthropic does not provide an embeddings API; route embeddings \
                      through an OpenAI-compatible provider"
                .into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axon_domain::message::Message;

    fn shaped(msg: Message, marker: bool) -> ShapedMessage {
        ShapedMessage {
            message: msg,
            cache_marker: marker,
        }
    }

    #[test]
    fn system_without_marker_is_plain_string() {
        let (system, messages) = split_system(&[
            shaped(Message::system("You are helpful"), false),
            shaped(Message::user("hi"), false),
        ]);
        assert_eq!(system.unwrap(), Value::String("You are helpful".into()));
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn marked_system_becomes_content_blocks() {
        let (system, _) = split_system(&[shaped(Message::system("cached prompt"), true)]);
        let blocks = system.unwrap();
        assert!(blocks.is_array());
        assert_eq!(blocks[0]["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn tool_result_becomes_user_tool_result_block() {
        let (_, messages) = split_system(&[shaped(Message::tool_result("t1", "a\nb"), false)]);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"][0]["type"], "tool_result");
        assert_eq!(messages[0]["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn assistant_tool_calls_become_tool_use_blocks() {
        let msg = Message::assistant_tool_calls(
            None,
            vec![ToolCall {
                id: "t1".into(),
                name: "list_dir".into(),
                arguments: serde_json::json!({"path": "/"}),
            }],
        );
        let v = assistant_to_anthropic(&msg);
        assert_eq!(v["content"][0]["type"], "tool_use");
        assert_eq!(v["content"][0]["input"]["path"], "/");
    }

    #[test]
    fn stop_reason_mapping() {
        let body = serde_json::json!({
            "content": [{"type": "text", "text": "Hello!"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2,
                      "cache_read_input_tokens": 4}
        });
        let r = parse_anthropic_response(&body).unwrap();
        assert_eq!(r.content.as_deref(), Some("Hello!"));
        assert_eq!(r.finish_reason.as_deref(), Some("stop"));
        let usage = r.usage.unwrap();
        assert_eq!(usage.total_tokens, 7);
        assert_eq!(usage.cache_read_input_tokens, Some(4));
    }

    #[test]
    fn tool_use_stop_reason_maps_to_tool_calls() {
        let body = serde_json::json!({
            "content": [{"type": "tool_use", "id": "t1", "name": "ls", "input": {}}],
            "stop_reason": "tool_use",
        });
        let r = parse_anthropic_response(&body).unwrap();
        assert_eq!(r.finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(r.tool_calls.len(), 1);
    }

    #[test]
    fn sse_stream_assembly() {
        let mut state = StreamState::default();

        let start = parse_anthropic_sse(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":0}}}"#,
            &mut state,
        );
        assert!(start.is_empty());

        let token = parse_anthropic_sse(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            &mut state,
        );
        assert!(matches!(&token[0], Ok(StreamEvent::Token(t)) if t == "Hi"));

        let done = parse_anthropic_sse(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#,
            &mut state,
        );
        match &done[0] {
            Ok(StreamEvent::Done {
                usage: Some(u),
                finish_reason: Some(r),
            }) => {
                assert_eq!(u.total_tokens, 13);
                assert_eq!(r, "stop");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // message_stop after message_delta must not double-emit Done.
        let stop = parse_anthropic_sse(r#"{"type":"message_stop"}"#, &mut state);
        assert!(stop.is_empty());
    }

    #[test]
    fn sse_tool_call_events() {
        let mut state = StreamState::default();
        let start = parse_anthropic_sse(
            r#"{"type":"content_block_start","index":1,
                "content_block":{"type":"tool_use","id":"t9","name":"run"}}"#,
            &mut state,
        );
        assert!(matches!(
            &start[0],
            Ok(StreamEvent::ToolCallStarted { index: 1, call_id, .. }) if call_id == "t9"
        ));

        let delta = parse_anthropic_sse(
            r#"{"type":"content_block_delta","index":1,
                "delta":{"type":"input_json_delta","partial_json":"{\"x\":1}"}}"#,
            &mut state,
        );
        assert!(matches!(
            &delta[0],
            Ok(StreamEvent::ToolCallDelta { index: 1, fragment }) if fragment == "{\"x\":1}"
        ));
    }
}
