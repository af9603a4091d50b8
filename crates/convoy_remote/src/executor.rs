//! Task executor - applies task flags and runs the batch on one host.

use crate::mutex::HostMutexes;
use crate::task::{shell_quote, RemoteTask};
use crate::transport::ExecTransport;
use crate::ExecError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Result of a completed task: exit code, captured output, and the pid
/// extracted from the task's pid file when one was requested.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub pid: Option<i32>,
}

/// Executes [`RemoteTask`] batches against one host.
///
/// Cloning is cheap; clones share the transport and the mutex registry.
#[derive(Clone)]
pub struct TaskExecutor {
    transport: Arc<dyn ExecTransport>,
    mutexes: Arc<HostMutexes>,
}

impl TaskExecutor {
    pub fn new(transport: Arc<dyn ExecTransport>, mutexes: Arc<HostMutexes>) -> Self {
        Self { transport, mutexes }
    }

    pub fn host(&self) -> &str {
        self.transport.host()
    }

    /// Acquires a named mutex scoped to this executor's host. Used by
    /// callers that need exclusion across more than one task, e.g. a
    /// detect-then-install sequence for a shared prerequisite.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.mutexes.acquire(self.transport.host(), name).await
    }

    /// Runs the task. Acquires the task's named mutex (if any) around the
    /// whole batch, enforces the non-zero-exit policy, and extracts a pid
    /// from the task's pid file when one was requested.
    pub async fn execute(&self, task: RemoteTask) -> Result<ExecResult, ExecError> {
        let _guard = match &task.mutex {
            Some(name) => Some(self.lock(name).await),
            None => None,
        };

        let mut script = task.render_script();
        if task.run_as_privileged {
            script = format!("sudo -E /bin/sh -c {}", shell_quote(&script));
        }

        debug!(host = self.host(), task = task.summary(), "executing task");
        let output = self.transport.exec(&script, &task.env).await?;

        if output.exit_code != 0 && !task.tolerate_non_zero {
            return Err(ExecError::CommandFailed {
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let pid = match &task.use_pid_file {
            Some(path) if output.exit_code == 0 => Some(self.read_pid(path).await?),
            _ => None,
        };

        Ok(ExecResult {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            pid,
        })
    }

    /// Copies bytes to a path on this executor's host.
    pub async fn copy_to(
        &self,
        bytes: &[u8],
        remote_path: &str,
        mode: Option<&str>,
    ) -> Result<(), ExecError> {
        debug!(host = self.host(), path = remote_path, "copying artifact");
        self.transport.copy_to(bytes, remote_path, mode).await
    }

    async fn read_pid(&self, path: &str) -> Result<i32, ExecError> {
        let output = self
            .transport
            .exec(&format!("cat {}", shell_quote(path)), &BTreeMap::new())
            .await?;
        if output.exit_code != 0 {
            return Err(ExecError::PidUnavailable {
                path: path.to_string(),
            });
        }
        output
            .stdout
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<i32>().ok())
            .ok_or_else(|| ExecError::PidUnavailable {
                path: path.to_string(),
            })
    }
}
