//! Builtin sandbox tools.
//!
//! Both tools bind their execution to the calling turn's
//! `(user, conversation)` through the session manager, so consecutive
//! calls in one conversation share an environment. Commands are
//! recorded on the session for the environment-tracking history.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use axon_domain::config::SandboxSettings;
use axon_domain::message::ToolDefinition;
use axon_domain::{Error, Result};
use axon_sandbox::executor::ExecutionResult;
use axon_sandbox::SessionManager;

use crate::registry::{Tool, ToolContext};

fn render_result(result: &ExecutionResult) -> Result<String> {
    if let Some(error) = &result.error {
        return Err(Error::Other(error.clone()));
    }
    let mut output = result.stdout.clone();
    if !result.stderr.is_empty() {
        if !output.is_empty() {
            output.push('\n');
        }
        output.push_str(&result.stderr);
    }
    if !result.success {
        return Err(Error::Other(if output.is_empty() {
            format!("exit code {}", result.exit_code)
        } else {
            output
        }));
    }
    Ok(output)
}

async fn acquire_session(
    sessions: &SessionManager,
    ctx: &ToolContext,
) -> Result<axon_sandbox::SessionHandle> {
    let result = sessions
        .get_or_create(ctx.user_id.as_deref(), ctx.conversation_id.as_deref())
        .await?;
    Ok(result.session)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute_python
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs Python code in the conversation's sandbox session.
pub struct PythonTool {
    sessions: Arc<SessionManager>,
    settings: SandboxSettings,
}

impl PythonTool {
    pub fn new(sessions: Arc<SessionManager>, settings: SandboxSettings) -> Self {
        Self { sessions, settings }
    }
}

#[async_trait]
impl Tool for PythonTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_python".into(),
            description: "Execute Python code in an isolated sandbox. State (variables, \
                          installed packages, files) persists across calls within the \
                          same conversation."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The Python code to execute"
                    }
                },
                "required": ["code"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String> {
        let code = args
            .get("code")
            .and_then(|c| c.as_str())
            .ok_or_else(|| Error::Other("missing required argument: code".into()))?;

        let session = acquire_session(&self.sessions, ctx).await?;
        let result = session.executor.execute_python(code, &self.settings).await?;
        self.sessions
            .record_command(&session.session_id, "python /tmp/script.py", result.duration_ms)
            .await;
        render_result(&result)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// execute_shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Runs a shell command in the conversation's sandbox session.
pub struct ShellTool {
    sessions: Arc<SessionManager>,
    settings: SandboxSettings,
}

impl ShellTool {
    pub fn new(sessions: Arc<SessionManager>, settings: SandboxSettings) -> Self {
        Self { sessions, settings }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "execute_shell".into(),
            description: "Execute a shell command in an isolated sandbox. The working \
                          directory and files persist across calls within the same \
                          conversation."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String> {
        let command = args
            .get("command")
            .and_then(|c| c.as_str())
            .ok_or_else(|| Error::Other("missing required argument: command".into()))?;

        let session = acquire_session(&self.sessions, ctx).await?;
        let result = session
            .executor
            .execute_shell(command, &self.settings)
            .await?;
        self.sessions
            .record_command(&session.session_id, command, result.duration_ms)
            .await;
        render_result(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_success_merges_streams() {
        let r = ExecutionResult {
            success: true,
            stdout: "out".into(),
            stderr: "warn".into(),
            exit_code: 0,
            duration_ms: 1,
            error: None,
        };
        assert_eq!(render_result(&r).unwrap(), "out\nwarn");
    }

    #[test]
    fn render_failure_is_error() {
        let r = ExecutionResult {
            success: false,
            stdout: String::new(),
            stderr: "boom".into(),
            exit_code: 2,
            duration_ms: 1,
            error: None,
        };
        assert!(render_result(&r).is_err());
    }

    #[test]
    fn render_timeout_propagates_message() {
        let r = ExecutionResult::timed_out(30, 30_000);
        let err = render_result(&r).unwrap_err();
        assert!(err.to_string().contains("timed out after 30s"));
    }
}
