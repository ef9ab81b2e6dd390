//! Durable turn state, owned by the checkpointer.
//!
//! The orchestrator reads a copy, mutates it locally during the turn, and
//! writes it back at iteration boundaries and before emitting a terminal
//! event. `pending_tool_calls` is only non-empty in checkpoints taken at
//! an approval interrupt.

use serde::{Deserialize, Serialize};

use crate::memory::Memory;
use crate::message::{Message, ToolCall};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnState {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    pub iteration: u32,
    pub tool_iteration: u32,
    pub total_tokens: u64,
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub recalled_memories: Vec<Memory>,
}

impl TurnState {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// The content of the most recent message, used as the recall query.
    pub fn last_message_content(&self) -> &str {
        self.messages
            .last()
            .and_then(|m| m.content.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_counters() {
        let mut s = TurnState::new("s1", "u1");
        s.iteration = 3;
        s.tool_iteration = 2;
        s.total_tokens = 1234;
        s.messages.push(Message::user("hello"));

        let json = serde_json::to_string(&s).unwrap();
        let back: TurnState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.iteration, 3);
        assert_eq!(back.tool_iteration, 2);
        assert_eq!(back.total_tokens, 1234);
        assert_eq!(back.last_message_content(), "hello");
    }

    #[test]
    fn default_pending_is_empty() {
        let s: TurnState = serde_json::from_str(
            r#"{"session_id":"s","user_id":"u","messages":[],"iteration":0,
                "tool_iteration":0,"total_tokens":0}"#,
        )
        .unwrap();
        assert!(s.pending_tool_calls.is_empty());
        assert!(s.recalled_memories.is_empty());
    }
}
