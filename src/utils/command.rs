//! Utilities for running external tools with proper error handling and timeouts

use anyhow::{Context, Result};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

/// Run a command with optional timeout, failing on non-zero exit
pub async fn run_command(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    timeout: Option<Duration>,
) -> Result<Output> {
    let output = run_command_unchecked(program, args, envs, timeout).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!("Command failed: {} {}", program, args.join(" "));
        error!("Stderr: {}", stderr);
        anyhow::bail!(
            "Command failed with exit code {:?}: {}",
            output.status.code(),
            stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.is_empty() {
        debug!("Command output: {}", stdout);
    }

    Ok(output)
}

/// Run a command, returning the raw output regardless of exit status
///
/// Callers that need to inspect stderr on failure (e.g. "directory not
/// found" from rclone) use this instead of `run_command`.
pub async fn run_command_unchecked(
    program: &str,
    args: &[&str],
    envs: &[(&str, &str)],
    timeout: Option<Duration>,
) -> Result<Output> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    for (key, value) in envs {
        cmd.env(key, value);
    }

    debug!("Running command: {} {}", program, args.join(" "));

    if let Some(timeout_duration) = timeout {
        match tokio::time::timeout(timeout_duration, cmd.output()).await {
            Ok(output) => output.context(format!("Failed to execute {}", program)),
            Err(_) => Err(anyhow::anyhow!(
                "Command timed out after {:?}: {}",
                timeout_duration,
                program
            )),
        }
    } else {
        cmd.output()
            .await
            .context(format!("Failed to execute {}", program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_command_captures_stdout() {
        let output = run_command("echo", &["hello"], &[], None).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
    }

    #[tokio::test]
    async fn test_run_command_fails_on_nonzero_exit() {
        let result = run_command("false", &[], &[], None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_command_unchecked_keeps_failure_output() {
        let output = run_command_unchecked("sh", &["-c", "echo oops >&2; exit 3"], &[], None)
            .await
            .unwrap();
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("oops"));
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let result = run_command(
            "sleep",
            &["5"],
            &[],
            Some(Duration::from_millis(50)),
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
