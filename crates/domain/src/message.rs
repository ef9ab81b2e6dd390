//! Canonical conversation types.
//!
//! Every provider adapter converts to/from these; the orchestrator,
//! compressor, and memory pipeline only ever see this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the model.
///
/// `arguments` is the parsed JSON object; at the wire level providers
/// transport it as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolCall {
    /// Parse wire-level argument text leniently: malformed JSON is kept
    /// as `{"raw": "<original>"}` so the tool can decide what to do.
    pub fn parse_arguments(raw: &str) -> Value {
        if raw.trim().is_empty() {
            return Value::Object(Default::default());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(v) if v.is_object() => v,
            _ => serde_json::json!({ "raw": raw }),
        }
    }
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolResult {
    /// A failed result carrying an error message, used when a tool
    /// raises instead of returning.
    pub fn failure(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            success: false,
            output: String::new(),
            error: Some(error.into()),
            duration_ms,
        }
    }

    /// The content placed into the conversation as the `tool` message.
    pub fn message_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            let err = self.error.as_deref().unwrap_or("Unknown error occurred");
            if self.output.is_empty() {
                format!("Error: {err}")
            } else {
                format!("Error: {err}\nOutput: {}", self.output)
            }
        }
    }
}

/// A tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

impl ToolDefinition {
    /// Serialize into the OpenAI function-calling schema.
    pub fn to_openai(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// A message in the conversation.
///
/// For non-system messages at least one of `content` / `tool_calls` is
/// present. `reasoning_content` is an independent channel: reasoning
/// models may emit it while `content` stays empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    /// An assistant message carrying tool calls (content may be empty).
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    /// A `tool` role message answering the call with the given id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            reasoning_content: None,
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|tc| !tc.is_empty())
    }

    pub fn is_tool_result(&self) -> bool {
        self.tool_call_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_arguments_valid_object() {
        let v = ToolCall::parse_arguments(r#"{"path": "/"}"#);
        assert_eq!(v["path"], "/");
    }

    #[test]
    fn parse_arguments_malformed_becomes_raw() {
        let v = ToolCall::parse_arguments("{not json");
        assert_eq!(v["raw"], "{not json");
    }

    #[test]
    fn parse_arguments_non_object_becomes_raw() {
        let v = ToolCall::parse_arguments("[1,2,3]");
        assert_eq!(v["raw"], "[1,2,3]");
    }

    #[test]
    fn parse_arguments_empty_is_empty_object() {
        let v = ToolCall::parse_arguments("   ");
        assert_eq!(v, serde_json::json!({}));
    }

    #[test]
    fn tool_result_message_content_on_failure() {
        let r = ToolResult::failure("t1", "exec", "boom", 3);
        assert_eq!(r.message_content(), "Error: boom");
    }

    #[test]
    fn message_roundtrip_skips_absent_fields() {
        let m = Message::user("hi");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn tool_definition_openai_shape() {
        let def = ToolDefinition {
            name: "list_dir".into(),
            description: "List a directory".into(),
            parameters: serde_json::json!({"type": "object"}),
        };
        let v = def.to_openai();
        assert_eq!(v["type"], "function");
        assert_eq!(v["function"]["name"], "list_dir");
    }
}
