//! The event stream emitted during a single agent turn.
//!
//! Serialized as `{"type": "<variant>", "data": {...}}` so the stream can
//! be framed over SSE or any other transport. Consumers must ignore
//! unknown fields inside `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::ToolCall;

/// Events emitted during a single agent turn, in strict order.
///
/// Exactly one of `Done` / `Interrupt` / `Error` terminates a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A new conversation session was created. Always first if present.
    SessionCreated { session_id: String },

    /// The model is working; `content` carries reasoning text when the
    /// model exposes it.
    Thinking {
        status: String,
        iteration: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },

    /// A tool finished (successfully or not).
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        success: bool,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        duration_ms: u64,
    },

    /// Final (or partial) assistant text in generation order.
    Text { content: String },

    /// A session title was generated in the background.
    TitleUpdated { session_id: String, title: String },

    /// The sandbox session for this conversation was recreated after a
    /// cleanup; `previous_state` summarises what was lost.
    SessionRecreated {
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_state: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Terminal: the turn completed.
    Done {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
        iterations: u32,
        tool_iterations: u32,
        total_tokens: u64,
        /// Why the loop ended when it was not a natural stop
        /// (e.g. "token_budget", "tool_iteration_cap").
        #[serde(skip_serializing_if = "Option::is_none")]
        termination: Option<String>,
    },

    /// Terminal: the turn paused awaiting human approval of tool calls.
    Interrupt {
        session_id: String,
        pending_tool_calls: Vec<ToolCall>,
        message: String,
    },

    /// Terminal: the turn failed.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
}

impl AgentEvent {
    pub fn thinking(status: impl Into<String>, iteration: u32) -> Self {
        AgentEvent::Thinking {
            status: status.into(),
            iteration,
            content: None,
        }
    }

    pub fn reasoning(iteration: u32, content: impl Into<String>) -> Self {
        AgentEvent::Thinking {
            status: "reasoning".into(),
            iteration,
            content: Some(content.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        AgentEvent::Error {
            message: message.into(),
            session_id: None,
        }
    }

    /// Whether this event terminates the turn's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::Done { .. } | AgentEvent::Interrupt { .. } | AgentEvent::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let e = AgentEvent::SessionCreated {
            session_id: "s1".into(),
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "session_created");
        assert_eq!(v["data"]["session_id"], "s1");
    }

    #[test]
    fn thinking_without_content_omits_field() {
        let v = serde_json::to_value(AgentEvent::thinking("processing", 1)).unwrap();
        assert!(v["data"].get("content").is_none());
    }

    #[test]
    fn terminal_classification() {
        assert!(AgentEvent::error("x").is_terminal());
        assert!(AgentEvent::Done {
            content: String::new(),
            reasoning_content: None,
            iterations: 1,
            tool_iterations: 0,
            total_tokens: 0,
            termination: None,
        }
        .is_terminal());
        assert!(!AgentEvent::Text {
            content: "hi".into()
        }
        .is_terminal());
    }

    #[test]
    fn deserializes_ignoring_unknown_data_fields() {
        let raw = r#"{"type":"text","data":{"content":"hi","extra":42}}"#;
        let e: AgentEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(e, AgentEvent::Text { content } if content == "hi"));
    }
}
