//! Sandboxed code execution.
//!
//! Two executor modes (stateless `docker run --rm` and long-lived
//! session containers driven by `docker exec`) plus a development-only
//! local executor, and the [`SessionManager`] pool that owns session
//! lifecycles: reuse, LRU eviction, idle/disconnect/completion timers,
//! and recreation notices.

pub mod docker;
pub mod executor;
pub mod local;
pub mod manager;

pub use docker::{DockerExecutor, SessionDockerExecutor};
pub use executor::{
    ExecutionResult, SandboxExecutor, SessionExecutor, SessionExecutorFactory,
};
pub use local::LocalExecutor;
pub use manager::{
    CleanupReason, SessionHandle, SessionManager, SessionRecreationResult, SessionState,
};
