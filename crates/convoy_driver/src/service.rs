//! Data-driven shell service driver.
//!
//! A [`ServiceDefinition`] describes how one service kind is installed,
//! configured, launched, probed, and stopped on one platform; the
//! [`ShellServiceDriver`] executes those commands for one resource.

use crate::script::{Phase, ScriptBuilder};
use crate::{Driver, DriverError, LivenessStrategy, Platform, ResourceKind};
use async_trait::async_trait;
use convoy_remote::TaskExecutor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A shared install step (e.g. a language runtime) that co-located
/// resources on the same host must not run concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrerequisitePackage {
    pub name: String,
    /// Exit code 0 means the prerequisite is already present.
    pub detect: String,
    pub install: Vec<String>,
}

/// A templated config artifact pushed to the host during customize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateFile {
    pub remote_path: String,
    pub template: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// Static description of how to run one service kind on one platform.
///
/// Command strings may reference `{{kind}}`, `{{resource}}`, `{{host}}`,
/// `{{port}}`, `{{run_dir}}` and `{{pid_file}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub kind: ResourceKind,
    pub platform: Platform,
    pub run_dir: String,

    #[serde(default)]
    pub prerequisite: Option<PrerequisitePackage>,
    /// Exit code 0 means the service itself is already installed.
    #[serde(default)]
    pub detect_installed: Option<String>,
    #[serde(default)]
    pub install: Vec<String>,

    #[serde(default)]
    pub config_files: Vec<TemplateFile>,

    pub launch: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub pid_file: Option<String>,
    #[serde(default)]
    pub status_command: Option<String>,
    #[serde(default)]
    pub platform_service: Option<String>,
    #[serde(default)]
    pub stop_command: Option<String>,
    #[serde(default)]
    pub reload_command: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_launch_settle_ms")]
    pub launch_settle_ms: u64,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

fn default_launch_settle_ms() -> u64 {
    500
}

fn default_stop_grace_ms() -> u64 {
    2000
}

/// Substitutes `{{key}}` placeholders; unknown placeholders are left
/// untouched.
pub(crate) fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Generic driver that runs a [`ServiceDefinition`]'s shell commands
/// through a [`TaskExecutor`]. One instance per resource run.
pub struct ShellServiceDriver {
    definition: ServiceDefinition,
    executor: TaskExecutor,
    resource: String,
    // 0 = no pid recorded
    pid: AtomicI32,
}

impl ShellServiceDriver {
    pub fn new(
        definition: ServiceDefinition,
        executor: TaskExecutor,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            definition,
            executor,
            resource: resource.into(),
            pid: AtomicI32::new(0),
        }
    }

    fn vars(&self) -> BTreeMap<String, String> {
        let def = &self.definition;
        let mut vars = BTreeMap::new();
        vars.insert("kind".to_string(), def.kind.to_string());
        vars.insert("resource".to_string(), self.resource.clone());
        vars.insert("host".to_string(), self.executor.host().to_string());
        vars.insert("run_dir".to_string(), def.run_dir.clone());
        if let Some(port) = def.port {
            vars.insert("port".to_string(), port.to_string());
        }
        if let Some(pid_file) = &def.pid_file {
            vars.insert("pid_file".to_string(), render(pid_file, &vars));
        }
        vars
    }

    fn pid_file(&self) -> Option<String> {
        self.vars().get("pid_file").cloned()
    }

    /// Ports below 1024 need elevated rights to bind.
    fn privileged(&self) -> bool {
        self.definition.port.map(|p| p < 1024).unwrap_or(false)
    }

    fn clear_pid(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }

    async fn install_prerequisite(
        &self,
        prereq: &PrerequisitePackage,
    ) -> Result<(), DriverError> {
        // Serialize with co-located resources installing the same
        // prerequisite on this host; held across detect and install.
        let _guard = self.executor.lock(&format!("install:{}", prereq.name)).await;

        let detect = self
            .executor
            .execute(
                ScriptBuilder::new(Phase::Installing, &self.resource)
                    .body(prereq.detect.clone())
                    .tolerate_non_zero()
                    .build(),
            )
            .await?;
        if detect.exit_code == 0 {
            debug!(
                resource = %self.resource,
                prerequisite = %prereq.name,
                "prerequisite already present"
            );
            return Ok(());
        }
        warn!(
            resource = %self.resource,
            prerequisite = %prereq.name,
            exit_code = detect.exit_code,
            "prerequisite not detected, installing"
        );

        self.executor
            .execute(
                ScriptBuilder::new(Phase::Installing, &self.resource)
                    .append(prereq.install.clone())
                    .build(),
            )
            .await?;
        Ok(())
    }

    async fn probe(&self, strategy: &LivenessStrategy) -> Result<bool, DriverError> {
        let script = match strategy {
            LivenessStrategy::PidFile(path) => {
                format!("test -f {path} && kill -0 $(cat {path})")
            }
            LivenessStrategy::StatusCommand(cmd) => {
                format!("cd {}\n{cmd}", self.definition.run_dir)
            }
            LivenessStrategy::PlatformService(name) => format!("service {name} status"),
        };
        let result = self
            .executor
            .execute(
                ScriptBuilder::new(Phase::CheckRunning, &self.resource)
                    .body(script)
                    .tolerate_non_zero()
                    .build(),
            )
            .await?;
        Ok(result.exit_code == 0)
    }

    /// The managed stop command, if the definition has one: an explicit
    /// stop command wins over the platform service manager.
    fn managed_stop(&self, vars: &BTreeMap<String, String>) -> Option<String> {
        if let Some(cmd) = &self.definition.stop_command {
            return Some(render(cmd, vars));
        }
        self.definition
            .platform_service
            .as_ref()
            .map(|name| format!("service {name} stop"))
    }
}

#[async_trait]
impl Driver for ShellServiceDriver {
    async fn install(&self) -> Result<(), DriverError> {
        let vars = self.vars();
        if let Some(prereq) = &self.definition.prerequisite {
            self.install_prerequisite(prereq).await?;
        }

        if let Some(detect) = &self.definition.detect_installed {
            let probe = self
                .executor
                .execute(
                    ScriptBuilder::new(Phase::Installing, &self.resource)
                        .body(render(detect, &vars))
                        .tolerate_non_zero()
                        .build(),
                )
                .await?;
            if probe.exit_code == 0 {
                debug!(resource = %self.resource, "already installed, skipping");
                return Ok(());
            }
        }

        if self.definition.install.is_empty() {
            return Ok(());
        }
        info!(resource = %self.resource, kind = %self.definition.kind, "installing");
        self.executor
            .execute(
                ScriptBuilder::new(Phase::Installing, &self.resource)
                    .append(self.definition.install.iter().map(|c| render(c, &vars)))
                    .build(),
            )
            .await?;
        Ok(())
    }

    async fn customize(&self) -> Result<(), DriverError> {
        let vars = self.vars();
        self.executor
            .execute(
                ScriptBuilder::new(Phase::Customizing, &self.resource)
                    .body(format!("mkdir -p {}", self.definition.run_dir))
                    .build(),
            )
            .await?;

        for file in &self.definition.config_files {
            let text = render(&file.template, &vars);
            let path = render(&file.remote_path, &vars);
            self.executor
                .copy_to(text.as_bytes(), &path, file.mode.as_deref())
                .await?;
        }
        Ok(())
    }

    async fn launch(&self) -> Result<(), DriverError> {
        let vars = self.vars();
        let mut builder = ScriptBuilder::new(Phase::Launching, &self.resource)
            .body(format!("cd {}", self.definition.run_dir))
            .body(render(&self.definition.launch, &vars))
            .run_as_privileged(self.privileged());
        for (key, value) in &self.definition.env {
            builder = builder.env(key, render(value, &vars));
        }
        if let Some(pid_file) = self.pid_file() {
            builder = builder.use_pid_file(pid_file);
        }

        let result = self.executor.execute(builder.build()).await?;
        if let Some(pid) = result.pid {
            self.pid.store(pid, Ordering::SeqCst);
        }
        info!(resource = %self.resource, pid = ?result.pid, "launched");
        Ok(())
    }

    async fn is_running(&self) -> Result<bool, DriverError> {
        let strategies = self.liveness_strategies();
        let strategy = strategies
            .first()
            .ok_or_else(|| DriverError::NoLivenessStrategy {
                resource: self.resource.clone(),
            })?;
        self.probe(strategy).await
    }

    async fn stop(&self) -> Result<(), DriverError> {
        let vars = self.vars();
        let managed_stop = self.managed_stop(&vars);
        let pid_file = self.pid_file();

        if managed_stop.is_none() && pid_file.is_none() {
            return Err(DriverError::NoStopStrategy {
                resource: self.resource.clone(),
            });
        }

        if !self.is_running().await? {
            self.clear_pid();
            return Ok(());
        }

        if let Some(stop) = managed_stop {
            // Best-effort managed stop; escalation below handles survivors.
            self.executor
                .execute(
                    ScriptBuilder::new(Phase::Stopping, &self.resource)
                        .body(format!("cd {}", self.definition.run_dir))
                        .body(stop)
                        .run_as_privileged(self.privileged())
                        .tolerate_non_zero()
                        .build(),
                )
                .await?;
            if !self.is_running().await? {
                self.clear_pid();
                return Ok(());
            }
        }

        if let Some(pid_file) = pid_file {
            let grace = Duration::from_millis(self.definition.stop_grace_ms);

            warn!(resource = %self.resource, "still alive after managed stop, sending SIGTERM");
            self.executor
                .execute(
                    ScriptBuilder::new(Phase::Killing, &self.resource)
                        .body(format!("test -f {pid_file} && kill $(cat {pid_file})"))
                        .run_as_privileged(self.privileged())
                        .tolerate_non_zero()
                        .build(),
                )
                .await?;
            tokio::time::sleep(grace).await;
            if !self.probe(&LivenessStrategy::PidFile(pid_file.clone())).await? {
                self.clear_pid();
                return Ok(());
            }

            warn!(resource = %self.resource, "still alive after SIGTERM, sending SIGKILL");
            self.executor
                .execute(
                    ScriptBuilder::new(Phase::Killing, &self.resource)
                        .body(format!("test -f {pid_file} && kill -9 $(cat {pid_file})"))
                        .run_as_privileged(self.privileged())
                        .tolerate_non_zero()
                        .build(),
                )
                .await?;
            tokio::time::sleep(grace).await;
            if !self.probe(&LivenessStrategy::PidFile(pid_file)).await? {
                self.clear_pid();
                return Ok(());
            }
        }

        Err(DriverError::StopFailed {
            resource: self.resource.clone(),
        })
    }

    fn liveness_strategies(&self) -> Vec<LivenessStrategy> {
        let mut strategies = Vec::new();
        if let Some(pid_file) = self.pid_file() {
            strategies.push(LivenessStrategy::PidFile(pid_file));
        }
        if let Some(cmd) = &self.definition.status_command {
            strategies.push(LivenessStrategy::StatusCommand(render(cmd, &self.vars())));
        }
        if let Some(name) = &self.definition.platform_service {
            strategies.push(LivenessStrategy::PlatformService(name.clone()));
        }
        strategies
    }

    fn post_launch_settle(&self) -> Duration {
        Duration::from_millis(self.definition.launch_settle_ms)
    }

    fn recorded_pid(&self) -> Option<i32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    async fn reload(&self) -> Result<(), DriverError> {
        let vars = self.vars();
        let Some(reload) = &self.definition.reload_command else {
            return Err(DriverError::ReloadUnsupported {
                kind: self.definition.kind.clone(),
            });
        };

        // Skip when not running: stop() must not race a reload into
        // restarting the process, and the post-start update regenerates
        // the configuration anyway.
        if !self.is_running().await? {
            debug!(resource = %self.resource, "not running, skipping reload");
            return Ok(());
        }

        self.executor
            .execute(
                ScriptBuilder::new(Phase::Restarting, &self.resource)
                    .body(format!("cd {}", self.definition.run_dir))
                    .body(render(reload, &vars))
                    .run_as_privileged(self.privileged())
                    .build(),
            )
            .await?;
        Ok(())
    }
}
