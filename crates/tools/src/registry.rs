//! Tool resolution, policy gating, and execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

use axon_domain::config::ToolSettings;
use axon_domain::message::{ToolDefinition, ToolResult};
use axon_domain::{Error, Result};

/// Per-turn context handed to tools: which user and conversation the
/// call belongs to, so stateful tools (sandbox) can bind their session.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub session_id: Option<String>,
}

/// A callable tool. Implementations validate their own arguments.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Execute and return the textual output. Errors are converted to
    /// failed [`ToolResult`]s by the registry.
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> Result<String>;
}

/// The policy verdict for one tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGate {
    Allowed,
    NotAvailable,
    NeedsApproval,
}

/// Registered tools plus the allow/deny/approval policy.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    settings: ToolSettings,
    auto_approve: Vec<Regex>,
}

impl ToolRegistry {
    pub fn new(settings: ToolSettings) -> Self {
        let auto_approve = settings
            .auto_approve_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!(pattern = %p, error = %e, "invalid auto-approve pattern");
                    None
                }
            })
            .collect();
        Self {
            tools: RwLock::new(HashMap::new()),
            settings,
            auto_approve,
        }
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.definition().name;
        tracing::debug!(tool = %name, "registered tool");
        self.tools.write().insert(name, tool);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Apply the policy to a prospective call.
    ///
    /// Disabled tools (or tools outside a non-empty allow list, or
    /// unregistered names) are `NotAvailable`. Confirmation-gated
    /// tools need approval unless an auto-approve pattern matches the
    /// serialized arguments.
    pub fn gate(&self, name: &str, args: &Value) -> ToolGate {
        if !self.contains(name) {
            return ToolGate::NotAvailable;
        }
        if self.settings.disabled.iter().any(|d| d == name) {
            return ToolGate::NotAvailable;
        }
        if !self.settings.enabled.is_empty() && !self.settings.enabled.iter().any(|e| e == name) {
            return ToolGate::NotAvailable;
        }
        if self.settings.require_confirmation.iter().any(|r| r == name) {
            let serialized = args.to_string();
            let auto = self
                .auto_approve
                .iter()
                .any(|re| re.is_match(&serialized));
            if !auto {
                return ToolGate::NeedsApproval;
            }
        }
        ToolGate::Allowed
    }

    /// Execute one tool call end to end, measuring duration.
    ///
    /// Policy violations surface as typed errors (`ToolNotAvailable`,
    /// `ApprovalRequired`); execution failures come back as failed
    /// [`ToolResult`]s, not errors.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        call_id: &str,
        name: &str,
        args: &Value,
    ) -> Result<ToolResult> {
        match self.gate(name, args) {
            ToolGate::NotAvailable => {
                return Err(Error::ToolNotAvailable(name.to_string()));
            }
            ToolGate::NeedsApproval => {
                return Err(Error::ApprovalRequired(name.to_string()));
            }
            ToolGate::Allowed => {}
        }

        let tool = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ToolNotAvailable(name.to_string()))?;

        let started = Instant::now();
        let result = tool.execute(ctx, args).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => Ok(ToolResult {
                tool_call_id: call_id.to_string(),
                tool_name: name.to_string(),
                success: true,
                output,
                error: None,
                duration_ms,
            }),
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "tool execution failed");
                Ok(ToolResult::failure(call_id, name, e.to_string(), duration_ms))
            }
        }
    }

    /// OpenAI-format definitions for the named tools (unknown names
    /// are skipped). An empty list selects every registered tool the
    /// policy allows.
    pub fn to_openai_tools(&self, names: &[String]) -> Vec<ToolDefinition> {
        let tools = self.tools.read();
        let mut selected: Vec<ToolDefinition> = if names.is_empty() {
            tools.values().map(|t| t.definition()).collect()
        } else {
            names
                .iter()
                .filter_map(|n| tools.get(n).map(|t| t.definition()))
                .collect()
        };
        selected.retain(|def| !self.settings.disabled.iter().any(|d| *d == def.name));
        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "echo".into(),
                description: "Echo the input back".into(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                }),
            }
        }

        async fn execute(&self, _ctx: &ToolContext, args: &Value) -> Result<String> {
            Ok(args["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "broken".into(),
                description: "Always fails".into(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _ctx: &ToolContext, _args: &Value) -> Result<String> {
            Err(Error::Other("kaboom".into()))
        }
    }

    fn registry(settings: ToolSettings) -> ToolRegistry {
        let r = ToolRegistry::new(settings);
        r.register(Arc::new(EchoTool));
        r.register(Arc::new(FailingTool));
        r
    }

    #[tokio::test]
    async fn executes_and_measures() {
        let r = registry(ToolSettings::default());
        let result = r
            .execute(
                &ToolContext::default(),
                "t1",
                "echo",
                &serde_json::json!({"text": "a\nb"}),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "a\nb");
        assert_eq!(result.tool_call_id, "t1");
    }

    #[tokio::test]
    async fn tool_failure_becomes_failed_result() {
        let r = registry(ToolSettings::default());
        let result = r
            .execute(&ToolContext::default(), "t1", "broken", &serde_json::json!({}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("kaboom"));
    }

    #[tokio::test]
    async fn disabled_tool_is_not_available() {
        let r = registry(ToolSettings {
            disabled: vec!["echo".into()],
            ..Default::default()
        });
        let err = r
            .execute(&ToolContext::default(), "t1", "echo", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotAvailable(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_available() {
        let r = registry(ToolSettings::default());
        assert_eq!(r.gate("ghost", &serde_json::json!({})), ToolGate::NotAvailable);
    }

    #[tokio::test]
    async fn allow_list_excludes_others() {
        let r = registry(ToolSettings {
            enabled: vec!["broken".into()],
            ..Default::default()
        });
        assert_eq!(r.gate("echo", &serde_json::json!({})), ToolGate::NotAvailable);
        assert_eq!(r.gate("broken", &serde_json::json!({})), ToolGate::Allowed);
    }

    #[tokio::test]
    async fn confirmation_gating_and_auto_approve() {
        let r = registry(ToolSettings {
            require_confirmation: vec!["echo".into()],
            auto_approve_patterns: vec!["\"text\":\"safe".into()],
            ..Default::default()
        });

        let gated = r.gate("echo", &serde_json::json!({"text": "rm -rf /"}));
        assert_eq!(gated, ToolGate::NeedsApproval);

        let err = r
            .execute(
                &ToolContext::default(),
                "t1",
                "echo",
                &serde_json::json!({"text": "rm -rf /"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ApprovalRequired(_)));

        let auto = r.gate("echo", &serde_json::json!({"text": "safe value"}));
        assert_eq!(auto, ToolGate::Allowed);
    }

    #[test]
    fn openai_tool_export() {
        let r = registry(ToolSettings {
            disabled: vec!["broken".into()],
            ..Default::default()
        });
        let defs = r.to_openai_tools(&[]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");

        let named = r.to_openai_tools(&["echo".into(), "missing".into()]);
        assert_eq!(named.len(), 1);
    }
}
