//! Local executor — development only, no isolation.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use axon_domain::config::SandboxSettings;
use axon_domain::{Error, Result};

use crate::executor::{ExecutionResult, SandboxExecutor};

/// Runs commands directly on the host inside a work directory.
///
/// Unsafe by construction; gated to development configurations.
pub struct LocalExecutor {
    work_dir: PathBuf,
}

impl LocalExecutor {
    pub fn new(work_dir: impl Into<PathBuf>) -> Result<Self> {
        let work_dir = work_dir.into();
        std::fs::create_dir_all(&work_dir).map_err(Error::Io)?;
        Ok(Self { work_dir })
    }

    async fn run(&self, mut cmd: Command, timeout_seconds: u64) -> ExecutionResult {
        cmd.current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
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
            Ok(Ok(output)) => ExecutionResult {
                success: output.status.success(),
                stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                duration_ms: started.elapsed().as_millis() as u64,
                error: None,
            },
            Ok(Err(e)) => ExecutionResult::spawn_failure(
                e.to_string(),
                started.elapsed().as_millis() as u64,
            ),
            Err(_) => ExecutionResult::timed_out(
                timeout_seconds,
                started.elapsed().as_millis() as u64,
            ),
        }
    }
}

#[async_trait]
impl SandboxExecutor for LocalExecutor {
    async fn execute_python(
        &self,
        code: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
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

        let mut cmd = Command::new("python3");
        cmd.arg(code_file.path());
        let result = self.run(cmd, settings.timeout_seconds).await;
        drop(code_file);
        Ok(result)
    }

    async fn execute_shell(
        &self,
        command: &str,
        settings: &SandboxSettings,
    ) -> Result<ExecutionResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        Ok(self.run(cmd, settings.timeout_seconds).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SandboxSettings {
        SandboxSettings {
            timeout_seconds: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn shell_echo_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path()).unwrap();
        let result = exec.execute_shell("echo hello", &settings()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.stdout, "hello");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn shell_failure_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path()).unwrap();
        let result = exec.execute_shell("exit 3", &settings()).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_yields_canonical_result() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path()).unwrap();
        let fast = SandboxSettings {
            timeout_seconds: 1,
            ..Default::default()
        };
        let result = exec.execute_shell("sleep 10", &fast).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error.as_deref(), Some("Execution timed out after 1s"));
    }

    #[tokio::test]
    async fn commands_run_in_work_dir() {
        let dir = tempfile::tempdir().unwrap();
        let exec = LocalExecutor::new(dir.path()).unwrap();
        exec.execute_shell("echo data > artifact.txt", &settings())
            .await
            .unwrap();
        assert!(dir.path().join("artifact.txt").exists());
    }
}
