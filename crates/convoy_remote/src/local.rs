//! Local transport - runs scripts on this machine via `sh -c`.

use crate::transport::{ExecOutput, ExecTransport};
use crate::ExecError;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Runs scripts on the local machine. Used for single-host deployments
/// and for exercising drivers without a remote host.
pub struct LocalTransport {
    host: String,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
        }
    }
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecTransport for LocalTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(
        &self,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecOutput, ExecError> {
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .envs(env)
            .output()
            .await
            .map_err(|e| ExecError::transport(&self.host, e))?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn copy_to(
        &self,
        bytes: &[u8],
        remote_path: &str,
        mode: Option<&str>,
    ) -> Result<(), ExecError> {
        tokio::fs::write(remote_path, bytes)
            .await
            .map_err(|e| ExecError::transport(&self.host, e))?;

        if let Some(mode) = mode {
            let mode = u32::from_str_radix(mode, 8).map_err(|_| ExecError::Transport {
                host: self.host.clone(),
                message: format!("invalid file mode {mode:?}"),
            })?;
            let perms = std::os::unix::fs::PermissionsExt::from_mode(mode);
            tokio::fs::set_permissions(remote_path, perms)
                .await
                .map_err(|e| ExecError::transport(&self.host, e))?;
        }
        Ok(())
    }
}
