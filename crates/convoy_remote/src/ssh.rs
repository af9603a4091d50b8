//! SSH transport - shells out to the system `ssh` client.
//!
//! Scripts run as `ssh <target> sh -c '<script>'`; file copies stream the
//! bytes through `cat > path` on the far side, followed by a `chmod` when
//! a mode was requested.

use crate::task::shell_quote;
use crate::transport::{ExecOutput, ExecTransport};
use crate::ExecError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

pub struct SshTransport {
    host: String,
    user: Option<String>,
}

impl SshTransport {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    fn target(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes").arg(self.target());
        cmd
    }
}

/// Renders env assignments as export lines prefixed to the script, since
/// sshd does not forward arbitrary client environment variables.
fn script_with_env(script: &str, env: &BTreeMap<String, String>) -> String {
    let mut full = String::new();
    for (key, value) in env {
        full.push_str(&format!("export {}={}\n", key, shell_quote(value)));
    }
    full.push_str(script);
    full
}

#[async_trait]
impl ExecTransport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    async fn exec(
        &self,
        script: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<ExecOutput, ExecError> {
        let remote = format!("sh -c {}", shell_quote(&script_with_env(script, env)));
        let output = self
            .command()
            .arg(remote)
            .output()
            .await
            .map_err(|e| ExecError::transport(&self.host, e))?;

        // ssh exits 255 on connection/auth failure; that is a transport
        // problem, not a remote command result.
        let exit_code = output.status.code().unwrap_or(-1);
        if exit_code == 255 {
            return Err(ExecError::Transport {
                host: self.host.clone(),
                message: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(ExecOutput {
            exit_code,
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
        let quoted = shell_quote(remote_path);
        let mut sink = format!("cat > {quoted}");
        if let Some(mode) = mode {
            sink.push_str(&format!(" && chmod {mode} {quoted}"));
        }
        let remote = format!("sh -c {}", shell_quote(&sink));

        let mut child = self
            .command()
            .arg(remote)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ExecError::transport(&self.host, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| ExecError::transport(&self.host, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ExecError::transport(&self.host, e))?;
        if !output.status.success() {
            return Err(ExecError::Transport {
                host: self.host.clone(),
                message: format!(
                    "copy to {remote_path} failed: {}",
                    String::from_utf8_lossy(&output.stderr)
                ),
            });
        }
        Ok(())
    }
}
