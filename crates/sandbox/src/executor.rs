//! Executor contracts shared by the stateless and session modes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use axon_domain::config::SandboxSettings;
use axon_domain::Result;

/// The outcome of one code or shell execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    /// The canonical timeout result: `exit_code -1` and a message
    /// naming the limit.
    pub fn timed_out(timeout_seconds: u64, duration_ms: u64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration_ms,
            error: Some(format!("Execution timed out after {timeout_seconds}s")),
        }
    }

    pub fn spawn_failure(message: String, duration_ms: u64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            duration_ms,
            error: Some(message),
        }
    }
}

/// Runs Python code or shell commands in an isolated environment.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute_python(
        &self,
        code: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult>;

    async fn execute_shell(
        &self,
        command: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult>;
}

/// A session-mode executor: one long-lived environment whose state
/// (installed packages, files) persists across calls.
#[async_trait]
pub trait SessionExecutor: SandboxExecutor {
    /// Start the session environment; returns its id. Idempotent.
    async fn start_session(&self) -> Result<String>;

    /// Tear the environment down. Idempotent.
    async fn stop_session(&self) -> Result<()>;

    fn session_id(&self) -> Option<String>;

    /// Whether the session has exceeded its own idle allowance.
    fn is_expired(&self) -> bool;
}

/// Constructs session executors; injected into the session manager so
/// tests can supply process-free fakes.
pub trait SessionExecutorFactory: Send + Sync {
    fn create(
        &self,
        settings: &SandboxSettings,
        max_idle_seconds: u64,
    ) -> std::sync::Arc<dyn SessionExecutor>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_result_shape() {
        let r = ExecutionResult::timed_out(30, 30_012);
        assert!(!r.success);
        assert_eq!(r.exit_code, -1);
        assert_eq!(r.error.as_deref(), Some("Execution timed out after 30s"));
    }
}
