//! Agent and execution-environment configuration.
//!
//! Every field is defaulted so partial configs deserialize cleanly.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Configuration of a single agent consumed by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature in `[0, 2]`.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token budget for the whole turn (responses accumulate against it).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_true")]
    pub checkpoint_enabled: bool,
    /// Human-in-the-loop approval gating.
    #[serde(default)]
    pub hitl_enabled: bool,
    #[serde(default)]
    pub hitl_operations: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        serde_json::from_str("{}").expect("default agent config")
    }
}

fn default_agent_name() -> String {
    "assistant".into()
}
fn default_model() -> String {
    "deepseek-chat".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_max_iterations() -> u32 {
    10
}
fn default_true() -> bool {
    true
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution config (sandbox + tools)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    #[default]
    Docker,
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory: u64,
    /// CPU share (number of cores, fractional allowed).
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    /// Disk limit in megabytes (advisory; enforced by the runtime when
    /// supported).
    #[serde(default = "default_disk_mb")]
    pub disk: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: default_memory_mb(),
            cpu: default_cpu(),
            disk: default_disk_mb(),
        }
    }
}

fn default_memory_mb() -> u64 {
    256
}
fn default_cpu() -> f64 {
    1.0
}
fn default_disk_mb() -> u64 {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NetworkSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default)]
    pub dns: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySettings {
    #[serde(default = "default_true")]
    pub read_only_root: bool,
    #[serde(default = "default_true")]
    pub no_new_privileges: bool,
    #[serde(default = "default_true")]
    pub drop_capabilities: bool,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            read_only_root: true,
            no_new_privileges: true,
            drop_capabilities: true,
        }
    }
}

/// Timeouts and limits of the sandbox session pool, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionPolicy {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_disconnect_timeout")]
    pub disconnect_timeout: u64,
    #[serde(default = "default_completion_retain")]
    pub completion_retain: u64,
    #[serde(default = "default_max_session_duration")]
    pub max_session_duration: u64,
    #[serde(default = "default_max_sessions_per_user")]
    pub max_sessions_per_user: usize,
    #[serde(default = "default_max_total_sessions")]
    pub max_total_sessions: usize,
    #[serde(default = "default_true")]
    pub allow_session_reuse: bool,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            disconnect_timeout: default_disconnect_timeout(),
            completion_retain: default_completion_retain(),
            max_session_duration: default_max_session_duration(),
            max_sessions_per_user: default_max_sessions_per_user(),
            max_total_sessions: default_max_total_sessions(),
            allow_session_reuse: true,
        }
    }
}

fn default_idle_timeout() -> u64 {
    7200
}
fn default_disconnect_timeout() -> u64 {
    1800
}
fn default_completion_retain() -> u64 {
    3600
}
fn default_max_session_duration() -> u64 {
    28800
}
fn default_max_sessions_per_user() -> usize {
    5
}
fn default_max_total_sessions() -> usize {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerSettings {
    #[serde(default = "default_image")]
    pub image: String,
    /// When true, a long-lived session container is kept per
    /// conversation instead of one container per execution.
    #[serde(default = "default_true")]
    pub session_enabled: bool,
    /// Host path mounted into session containers, when set.
    #[serde(default)]
    pub workspace_volume: Option<String>,
    #[serde(default = "default_container_workspace")]
    pub container_workspace: String,
    #[serde(default)]
    pub session_policy: SessionPolicy,
}

impl Default for DockerSettings {
    fn default() -> Self {
        Self {
            image: default_image(),
            session_enabled: true,
            workspace_volume: None,
            container_workspace: default_container_workspace(),
            session_policy: SessionPolicy::default(),
        }
    }
}

fn default_image() -> String {
    "python:3.11-slim".into()
}
fn default_container_workspace() -> String {
    "/workspace".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    #[serde(default)]
    pub mode: SandboxMode,
    #[serde(default = "default_exec_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub resources: ResourceLimits,
    #[serde(default)]
    pub network: NetworkSettings,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub docker: DockerSettings,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            timeout_seconds: default_exec_timeout(),
            resources: ResourceLimits::default(),
            network: NetworkSettings::default(),
            security: SecuritySettings::default(),
            docker: DockerSettings::default(),
        }
    }
}

fn default_exec_timeout() -> u64 {
    30
}

/// Tool allow/deny and approval policy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolSettings {
    /// Explicit allow list; empty means all registered tools.
    #[serde(default)]
    pub enabled: Vec<String>,
    #[serde(default)]
    pub disabled: Vec<String>,
    #[serde(default)]
    pub require_confirmation: Vec<String>,
    /// Regexes matched against the serialized arguments; a match
    /// auto-approves a confirmation-gated call.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
}

/// The full execution environment configuration consumed by the session
/// manager and executors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_full_defaults() {
        let cfg: ExecutionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.sandbox.mode, SandboxMode::Docker);
        assert_eq!(cfg.sandbox.timeout_seconds, 30);
        assert_eq!(cfg.sandbox.resources.memory, 256);
        assert!(cfg.sandbox.security.read_only_root);
        assert_eq!(cfg.sandbox.docker.session_policy.idle_timeout, 7200);
        assert_eq!(cfg.sandbox.docker.session_policy.max_total_sessions, 200);
        assert!(cfg.tools.disabled.is_empty());
    }

    #[test]
    fn agent_config_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.max_iterations, 10);
        assert_eq!(cfg.max_tokens, 4096);
        assert!(cfg.checkpoint_enabled);
        assert!(!cfg.hitl_enabled);
    }

    #[test]
    fn partial_override_keeps_rest() {
        let cfg: SandboxSettings =
            serde_json::from_str(r#"{"mode": "local", "timeout_seconds": 5}"#).unwrap();
        assert_eq!(cfg.mode, SandboxMode::Local);
        assert_eq!(cfg.timeout_seconds, 5);
        assert_eq!(cfg.resources.cpu, 1.0);
    }
}
