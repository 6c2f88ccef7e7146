use std::process::Stdio;

use async_trait::async_trait;
use sluice_core::invocation::{LaunchError, ProcessLauncher};
use tokio::process::Command;
use tracing::debug;

/// Spawns the executable directly (no shell) and captures its stdout.
#[derive(Debug, Clone, Default)]
pub struct TokioProcessLauncher;

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    async fn execute_file(&self, path: &str, parameters: &[String]) -> Result<String, LaunchError> {
        let output = Command::new(path)
            .args(parameters)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| LaunchError::new(format!("failed to run `{path}`: {err}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = if stderr.trim().is_empty() {
                format!("`{path}` exited with {}", output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(LaunchError::new(message));
        }

        debug!(path, bytes = stdout.len(), "executable finished");
        Ok(stdout)
    }
}
