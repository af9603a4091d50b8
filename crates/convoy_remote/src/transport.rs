//! Transport trait - how a script reaches a host.

use crate::ExecError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Raw output of one script execution.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Successful execution with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Execution that exited with the given code, no output.
    pub fn code(exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

/// Executes shell scripts on one host and copies bytes to it.
///
/// A non-zero exit code is not an error at this layer; tolerance policy
/// lives in [`crate::TaskExecutor`]. Only connectivity and spawn failures
/// surface as [`ExecError::Transport`].
#[async_trait]
pub trait ExecTransport: Send + Sync {
    /// Host identity this transport talks to; also scopes named mutexes.
    fn host(&self) -> &str;

    /// Runs a shell script on the host with the given environment.
    async fn exec(
        &self,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecOutput, ExecError>;

    /// Copies bytes to a remote path, optionally setting an octal mode
    /// such as `"0400"`.
    async fn copy_to(
        &self,
        bytes: &[u8],
        remote_path: &str,
        mode: Option<&str>,
    ) -> Result<(), ExecError>;
}
