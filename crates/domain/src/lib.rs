//! Shared domain types for the Axon agent execution core.
//!
//! Everything that crosses a crate boundary lives here: messages, tool
//! calls, agent events, turn state, memory records, the shared error
//! type, configuration, and the token-count heuristic.

pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod state;
pub mod stream;
pub mod tokens;

pub use error::{Error, Result};
pub use event::AgentEvent;
pub use memory::Memory;
pub use message::{Message, Role, ToolCall, ToolDefinition, ToolResult};
pub use state::TurnState;
pub use stream::{BoxStream, Usage};
