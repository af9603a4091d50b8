//! convoy_remote - the task execution substrate.
//!
//! A [`RemoteTask`] is an ordered batch of shell commands plus an
//! environment mapping and execution flags. A [`TaskExecutor`] runs tasks
//! against one host through an [`ExecTransport`] and owns the host-scoped
//! named mutex registry. The executor itself keeps no other state; all
//! side effects happen on the target host.

use thiserror::Error;

pub mod executor;
pub mod local;
pub mod mutex;
pub mod ssh;
pub mod task;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use executor::{ExecResult, TaskExecutor};
pub use local::LocalTransport;
pub use mutex::HostMutexes;
pub use ssh::SshTransport;
pub use task::RemoteTask;
pub use transport::{ExecOutput, ExecTransport};

/// Errors raised by task execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Connectivity or spawn failure talking to the host. Always surfaced,
    /// never retried at this layer.
    #[error("transport failure on {host}: {message}")]
    Transport { host: String, message: String },

    /// The command batch exited non-zero and the task did not tolerate it.
    #[error("command exited with code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// A pid file was requested but no pid could be read from it.
    #[error("no pid could be read from {path}")]
    PidUnavailable { path: String },
}

impl ExecError {
    pub(crate) fn transport(host: &str, err: std::io::Error) -> Self {
        ExecError::Transport {
            host: host.to_string(),
            message: err.to_string(),
        }
    }
}
