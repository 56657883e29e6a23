//! Local execution transport.

use super::{ExecOutput, Transport};
use crate::error::{ProvisionError, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Execute scripts locally via `bash`, piped on stdin.
/// Uses bash (not sh/dash) because generated scripts use `set -o pipefail`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    /// Working directory for every script; inherits ours when unset
    pub cwd: Option<PathBuf>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        Self {
            cwd: Some(cwd.into()),
        }
    }
}

impl Transport for LocalTransport {
    fn exec(&self, script: &str) -> Result<ExecOutput> {
        tracing::trace!(script, "exec local");

        let mut cmd = Command::new("bash");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(ref dir) = self.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ProvisionError::Transport(format!("failed to spawn bash: {}", e)))?;

        if let Some(ref mut stdin) = child.stdin {
            stdin
                .write_all(script.as_bytes())
                .map_err(|e| ProvisionError::Transport(format!("stdin write error: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| ProvisionError::Transport(format!("wait error: {}", e)))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_echo() {
        let out = LocalTransport::new().exec("echo hello").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_local_failure() {
        let out = LocalTransport::new().exec("exit 42").unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
    }

    #[test]
    fn test_local_stderr() {
        let out = LocalTransport::new().exec("echo err >&2").unwrap();
        assert!(out.success());
        assert!(out.stderr.contains("err"));
    }

    #[test]
    fn test_local_signal_killed() {
        // No exit code when killed by a signal
        let out = LocalTransport::new().exec("kill -9 $$").unwrap();
        assert_eq!(out.exit_code, -1);
    }

    #[test]
    fn test_local_pipefail() {
        let out = LocalTransport::new()
            .exec("set -euo pipefail\nfalse | true")
            .unwrap();
        assert!(!out.success(), "pipefail should catch false in pipeline");
    }

    #[test]
    fn test_local_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = LocalTransport::in_dir(dir.path()).exec("touch marker").unwrap();
        assert!(out.success());
        assert!(dir.path().join("marker").exists());
    }
}
