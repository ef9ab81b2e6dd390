//! The agent execution engine.
//!
//! [`Core`] is the dependency-injection root holding every subsystem
//! (gateway, memory, compressor, checkpointer, sandbox pool, tools,
//! repository). [`turn::run_turn`] drives one agent turn end to end
//! and streams [`axon_domain::AgentEvent`]s to the caller.

pub mod cancel;
pub mod checkpoint;
pub mod core;
pub mod repository;
pub mod title;
pub mod turn;

pub use cancel::{CancelMap, CancelToken};
pub use checkpoint::{Checkpointer, InMemoryCheckpointer, JsonFileCheckpointer, StateDiff};
pub use core::{Core, CoreBuilder};
pub use repository::{InMemorySessionRepository, MessageRecord, SessionRecord, SessionRepository};
pub use turn::{run_turn, TurnInput, TurnLimits};
