//! Token-count heuristic.
//!
//! Counts are a fast byte-quarter estimate: stable across runs, pure,
//! and additive across concatenation to within one token per join.
//! Callers may pass a model name; it is accepted and ignored.

use crate::message::Message;

/// Estimate the token count of a text.
pub fn count(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Estimate with an (ignored) model hint, for call sites that carry one.
pub fn count_for_model(text: &str, _model: &str) -> usize {
    count(text)
}

/// Per-message envelope overhead (role framing, separators).
const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token cost of a message including serialized tool calls.
pub fn count_message(message: &Message) -> usize {
    let mut total = MESSAGE_OVERHEAD;
    if let Some(content) = &message.content {
        total += count(content);
    }
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            total += count(&call.name);
            total += count(&call.arguments.to_string());
        }
    }
    if let Some(reasoning) = &message.reasoning_content {
        total += count(reasoning);
    }
    total
}

/// Estimate the total token cost of a message list.
pub fn count_messages(messages: &[Message]) -> usize {
    messages.iter().map(count_message).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_zero() {
        assert_eq!(count(""), 0);
    }

    #[test]
    fn four_bytes_per_token() {
        assert_eq!(count("abcd"), 1);
        assert_eq!(count("abcde"), 2);
    }

    #[test]
    fn additive_within_one_token() {
        let a = "The quick brown fox jumps over";
        let b = " the lazy dog and keeps running onward.";
        let joined = format!("{a}{b}");
        let sum = count(a) + count(b);
        let whole = count(&joined);
        assert!(sum >= whole && sum <= whole + 1);
    }

    #[test]
    fn stable_across_calls() {
        let text = "stability check";
        assert_eq!(count(text), count(text));
        assert_eq!(count(text), count_for_model(text, "gpt-4o"));
    }

    #[test]
    fn message_count_includes_tool_calls() {
        let plain = Message::user("hello world");
        let with_tools = Message::assistant_tool_calls(
            None,
            vec![crate::message::ToolCall {
                id: "t1".into(),
                name: "list_dir".into(),
                arguments: serde_json::json!({"path": "/tmp"}),
            }],
        );
        assert!(count_message(&with_tools) > count_message(&plain) - count("hello world"));
        assert_eq!(
            count_messages(&[plain.clone(), with_tools.clone()]),
            count_message(&plain) + count_message(&with_tools)
        );
    }
}
