//! Docker-backed executors.
//!
//! Stateless mode spawns `docker run --rm` per call; session mode
//! keeps a detached container alive and drives it with `docker exec`.
//! Commands are wrapped exactly once by `sh -c` — callers must pass
//! bare commands.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use axon_domain::config::SandboxSettings;
use axon_domain::{Error, Result};

use crate::executor::{
    ExecutionResult, SandboxExecutor, SessionExecutor, SessionExecutorFactory,
};

const SESSION_CONTAINER_PREFIX: &str = "session-";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared process plumbing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run a prepared command with a hard timeout, collecting its output.
async fn run_with_timeout(mut cmd: Command, timeout_seconds: u64) -> ExecutionResult {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let started = Instant::now();

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ExecutionResult::spawn_failure(
                format!("failed to spawn: {e}"),
                started.elapsed().as_millis() as u64,
            );
        }
    };

    match tokio::time::timeout(Duration::from_secs(timeout_seconds), child.wait_with_output())
        .await
    {
        Ok(Ok(output)) => {
            let duration_ms = started.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);
            ExecutionResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code,
                duration_ms,
                error: None,
            }
        }
        Ok(Err(e)) => ExecutionResult::spawn_failure(
            e.to_string(),
            started.elapsed().as_millis() as u64,
        ),
        Err(_) => {
            // wait_with_output consumed the child; the container keeps
            // running until docker's own cleanup. --rm containers are
            // reaped by the daemon.
            ExecutionResult::timed_out(timeout_seconds, started.elapsed().as_millis() as u64)
        }
    }
}

fn apply_resource_flags(cmd: &mut Command, settings: &SandboxSettings) {
    cmd.arg("--memory")
        .arg(format!("{}m", settings.resources.memory));
    cmd.arg("--cpus").arg(settings.resources.cpu.to_string());
    cmd.arg("-e").arg("LANG=C.UTF-8");
    cmd.arg("-e").arg("LC_ALL=C.UTF-8");
    if !settings.network.enabled {
        cmd.arg("--network").arg("none");
    }
}

fn apply_security_flags(cmd: &mut Command, settings: &SandboxSettings) {
    if settings.security.read_only_root {
        cmd.arg("--read-only");
        cmd.arg("--tmpfs").arg("/tmp:rw,noexec,nosuid,size=64m");
    }
    if settings.security.no_new_privileges {
        cmd.arg("--security-opt").arg("no-new-privileges");
    }
    if settings.security.drop_capabilities {
        cmd.arg("--cap-drop").arg("ALL");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stateless executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One `docker run --rm` per execution.
pub struct DockerExecutor {
    python_image: String,
    shell_image: String,
}

impl DockerExecutor {
    pub fn new(python_image: impl Into<String>, shell_image: impl Into<String>) -> Self {
        Self {
            python_image: python_image.into(),
            shell_image: shell_image.into(),
        }
    }

    fn base_run_command(&self, settings: &SandboxSettings) -> Command {
        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("--rm").arg("--name").arg(format!(
            "sandbox-{}",
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));
        apply_resource_flags(&mut cmd, settings);
        apply_security_flags(&mut cmd, settings);
        cmd
    }
}

impl Default for DockerExecutor {
    fn default() -> Self {
        Self::new("python:3.11-slim", "alpine:latest")
    }
}

#[async_trait]
impl SandboxExecutor for DockerExecutor {
    async fn execute_python(
        &self,
        code: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
        // Code travels through a read-only bind mount.
        let code_file = tokio::task::spawn_blocking({
            let code = code.to_string();
            move || -> Result<tempfile::NamedTempFile> {
                let mut file = tempfile::Builder::new().suffix(".py").tempfile()?;
                std::io::Write::write_all(&mut file, code.as_bytes())?;
                Ok(file)
            }
        })
        .await
        .map_err(|e| Error::Other(format!("blocking task: {e}")))??;

        let mut cmd = self.base_run_command(settings);
        cmd.arg("-v").arg(format!(
            "{}:/code/script.py:ro",
            code_file.path().display()
        ));
        cmd.arg(&self.python_image);
        cmd.arg("sh").arg("-c").arg("python /code/script.py");

        let result = run_with_timeout(cmd, settings.timeout_seconds).await;
        drop(code_file);
        Ok(result)
    }

    async fn execute_shell(
        &self,
        command: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
        let mut cmd = self.base_run_command(settings);
        cmd.arg(&self.shell_image);
        cmd.arg("sh").arg("-c").arg(command);

        tracing::debug!(command, "stateless shell execution");
        Ok(run_with_timeout(cmd, settings.timeout_seconds).await)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct SessionInner {
    container_id: Option<String>,
    session_id: Option<String>,
    last_activity: Option<Instant>,
}

/// A long-lived container (`tail -f /dev/null`) driven with
/// `docker exec`. Installed packages and created files persist for the
/// life of the session. Runs with a writable root: persistence is the
/// point of session mode.
pub struct SessionDockerExecutor {
    settings: SandboxSettings,
    max_idle_seconds: u64,
    inner: Mutex<SessionInner>,
}

impl SessionDockerExecutor {
    pub fn new(settings: SandboxSettings, max_idle_seconds: u64) -> Self {
        Self {
            settings,
            max_idle_seconds,
            inner: Mutex::new(SessionInner::default()),
        }
    }

    fn container_name(session_id: &str) -> String {
        format!("{SESSION_CONTAINER_PREFIX}{session_id}")
    }

    fn touch(&self) {
        self.inner.lock().last_activity = Some(Instant::now());
    }

    async fn exec_in_container(&self, command: &str) -> Result<ExecutionResult> {
        let session_id = match self.inner.lock().session_id.clone() {
            Some(id) => id,
            None => return Err(Error::Other("session not started".into())),
        };
        self.touch();

        let mut cmd = Command::new("docker");
        cmd.arg("exec")
            .arg("-w")
            .arg(&self.settings.docker.container_workspace)
            .arg("-e")
            .arg("LANG=C.UTF-8")
            .arg("-e")
            .arg("LC_ALL=C.UTF-8")
            .arg(Self::container_name(&session_id))
            .arg("sh")
            .arg("-c")
            .arg(command);

        Ok(run_with_timeout(cmd, self.settings.timeout_seconds).await)
    }

    /// Remove session containers older than `max_age_seconds`,
    /// scanning the container runtime directly. Used on startup to
    /// reap sessions orphaned by a previous process.
    pub async fn cleanup_orphaned_containers(max_age_seconds: u64) -> Result<Vec<String>> {
        let output = Command::new("docker")
            .args([
                "ps",
                "-a",
                "--filter",
                &format!("name={SESSION_CONTAINER_PREFIX}"),
                "--format",
                "{{.Names}}\t{{.Status}}",
            ])
            .output()
            .await
            .map_err(|e| Error::Other(format!("docker ps: {e}")))?;

        if !output.status.success() {
            return Ok(Vec::new());
        }

        let mut cleaned = Vec::new();
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            let mut parts = line.splitn(2, '\t');
            let (Some(name), Some(status)) = (parts.next(), parts.next()) else {
                continue;
            };
            if !should_reap(status, max_age_seconds) {
                continue;
            }
            let _ = Command::new("docker")
                .args(["rm", "-f", name])
                .output()
                .await;
            tracing::info!(container = name, status, "reaped orphaned session container");
            cleaned.push(name.to_string());
        }
        Ok(cleaned)
    }

    /// Remove every session container (startup/shutdown sweep).
    pub async fn cleanup_all_session_containers() -> Result<Vec<String>> {
        let output = Command::new("docker")
            .args([
                "ps",
                "-aq",
                "--filter",
                &format!("name={SESSION_CONTAINER_PREFIX}"),
            ])
            .output()
            .await
            .map_err(|e| Error::Other(format!("docker ps: {e}")))?;

        let ids: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();

        if !ids.is_empty() {
            let mut cmd = Command::new("docker");
            cmd.args(["rm", "-f"]).args(&ids);
            let _ = cmd.output().await;
            tracing::info!(count = ids.len(), "removed all session containers");
        }
        Ok(ids)
    }
}

/// Parse a `docker ps` status line ("Up 2 hours", "Exited (0) ...")
/// and decide whether the container has outlived `max_age_seconds`.
fn should_reap(status: &str, max_age_seconds: u64) -> bool {
    if status.contains("Exited") {
        return true;
    }
    if !status.starts_with("Up") {
        return false;
    }
    let mut words = status.split_whitespace().skip(1);
    let amount: u64 = match words.next().and_then(|w| w.parse().ok()) {
        Some(n) => n,
        None => {
            // "Up About an hour" and similar; treat as one unit.
            1
        }
    };
    let unit = status;
    let age_seconds = if unit.contains("second") {
        amount
    } else if unit.contains("minute") {
        amount * 60
    } else if unit.contains("hour") {
        amount * 3600
    } else if unit.contains("day") || unit.contains("week") || unit.contains("month") {
        // Anything a day or older is far past any sane idle limit.
        return true;
    } else {
        return false;
    };
    age_seconds >= max_age_seconds
}

#[async_trait]
impl SandboxExecutor for SessionDockerExecutor {
    async fn execute_python(
        &self,
        code: &str,
        _settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
        // Write the code into the container, then run it. Single-quote
        // escaping keeps the heredoc-free path portable.
        let escaped = code.replace('\'', "'\"'\"'");
        let write = self
            .exec_in_container(&format!("printf '%s' '{escaped}' > /tmp/script.py"))
            .await?;
        if !write.success {
            return Ok(write);
        }
        self.exec_in_container("python /tmp/script.py").await
    }

    async fn execute_shell(
        &self,
        command: &str,
        _settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
        self.exec_in_container(command).await
    }
}

#[async_trait]
impl SessionExecutor for SessionDockerExecutor {
    async fn start_session(&self) -> Result<String> {
        if let Some(id) = self.inner.lock().session_id.clone() {
            return Ok(id);
        }

        let session_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        let container_name = Self::container_name(&session_id);

        let mut cmd = Command::new("docker");
        cmd.arg("run").arg("-d").arg("--name").arg(&container_name);
        apply_resource_flags(&mut cmd, &self.settings);
        if let Some(volume) = &self.settings.docker.workspace_volume {
            cmd.arg("-v").arg(format!(
                "{volume}:{}:rw",
                self.settings.docker.container_workspace
            ));
        }
        cmd.arg("-w").arg(&self.settings.docker.container_workspace);
        cmd.arg(&self.settings.docker.image);
        cmd.arg("tail").arg("-f").arg("/dev/null");

        tracing::info!(container = %container_name, "starting session container");

        let output = cmd
            .output()
            .await
            .map_err(|e| Error::Other(format!("docker run: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Other(format!(
                "failed to start session container: {stderr}"
            )));
        }

        let container_id = String::from_utf8_lossy(&output.stdout)
            .trim()
            .chars()
            .take(12)
            .collect::<String>();

        let mut inner = self.inner.lock();
        inner.container_id = Some(if container_id.is_empty() {
            container_name
        } else {
            container_id
        });
        inner.session_id = Some(session_id.clone());
        inner.last_activity = Some(Instant::now());
        Ok(session_id)
    }

    async fn stop_session(&self) -> Result<()> {
        let session_id = {
            let mut inner = self.inner.lock();
            let Some(id) = inner.session_id.take() else {
                return Ok(());
            };
            inner.container_id = None;
            inner.last_activity = None;
            id
        };

        tracing::info!(session_id = %session_id, "stopping session container");
        let _ = Command::new("docker")
            .args(["rm", "-f", &Self::container_name(&session_id)])
            .output()
            .await;
        Ok(())
    }

    fn session_id(&self) -> Option<String> {
        self.inner.lock().session_id.clone()
    }

    fn is_expired(&self) -> bool {
        self.inner
            .lock()
            .last_activity
            .is_some_and(|t| t.elapsed().as_secs() > self.max_idle_seconds)
    }
}

/// Default factory producing [`SessionDockerExecutor`]s.
pub struct DockerSessionFactory;

impl SessionExecutorFactory for DockerSessionFactory {
    fn create(
        &self,
        settings: &SandboxSettings,
        max_idle_seconds: u64,
    ) -> Arc<dyn SessionExecutor> {
        Arc::new(SessionDockerExecutor::new(settings.clone(), max_idle_seconds))
    }
}
