//! convoy_driver - the per-resource-kind capability for driving a process
//! on a host: install, customize, launch, liveness probe, stop.
//!
//! A [`Driver`] is bound to exactly one resource and one target host and
//! lives for one run of that resource; it is discarded and recreated on
//! restart. The generic [`ShellServiceDriver`] is parameterized by a
//! [`ServiceDefinition`]; concrete service kinds are data, not subclasses.

use async_trait::async_trait;
use convoy_remote::ExecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod registry;
pub mod script;
pub mod service;

pub use registry::{DriverFactory, DriverRegistry};
pub use script::{Phase, ScriptBuilder};
pub use service::{PrerequisitePackage, ServiceDefinition, ShellServiceDriver, TemplateFile};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    /// The definition offers no way to stop the process. Failing loud here
    /// beats leaving a process running untracked.
    #[error("no stop strategy configured for {resource}")]
    NoStopStrategy { resource: String },

    /// The stop escalation chain ran to the end but the process was still
    /// alive on the final check.
    #[error("failed to confirm process death for {resource} after stop escalation")]
    StopFailed { resource: String },

    #[error("no liveness strategy configured for {resource}")]
    NoLivenessStrategy { resource: String },

    #[error("no driver registered for kind {kind} on {platform}")]
    UnknownDriver { kind: ResourceKind, platform: Platform },

    /// Reload was invoked while no driver instance exists (stopped?).
    #[error("cannot reload {resource}: no driver instance")]
    NoDriver { resource: String },

    #[error("reload is not supported by the {kind} driver")]
    ReloadUnsupported { kind: ResourceKind },
}

/// Target platform of the host a resource is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Darwin => write!(f, "darwin"),
        }
    }
}

/// Names a kind of deployable service ("nginx", "postgres", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKind(pub String);

impl ResourceKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceKind {
    fn from(kind: &str) -> Self {
        Self(kind.to_string())
    }
}

/// One way of confirming a remote process is alive. Declaration order is
/// priority order: pid file, then the service's own status command, then
/// the platform service manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivenessStrategy {
    PidFile(String),
    StatusCommand(String),
    PlatformService(String),
}

impl LivenessStrategy {
    pub fn describe(&self) -> String {
        match self {
            LivenessStrategy::PidFile(path) => format!("pid file {path}"),
            LivenessStrategy::StatusCommand(_) => "status command".to_string(),
            LivenessStrategy::PlatformService(name) => format!("platform service {name}"),
        }
    }
}

/// Capability for installing, configuring, launching, probing, and
/// stopping one resource's process.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Installs the software. Idempotent: detects an existing install and
    /// skips the heavy work.
    async fn install(&self) -> Result<(), DriverError>;

    /// Renders and pushes per-resource configuration to the host. Runs
    /// after `install` and before `launch`.
    async fn customize(&self) -> Result<(), DriverError>;

    /// Starts the remote process and records its pid or service handle.
    /// Does not wait for readiness; post-launch checks are the caller's
    /// job.
    async fn launch(&self) -> Result<(), DriverError>;

    /// Single-shot liveness probe; the first applicable strategy wins.
    async fn is_running(&self) -> Result<bool, DriverError>;

    /// Graceful-then-escalating shutdown: managed stop, verify, SIGTERM,
    /// grace wait, SIGKILL, verify. Stopping an already stopped process
    /// is a no-op success.
    async fn stop(&self) -> Result<(), DriverError>;

    /// Liveness strategies this driver can answer, in priority order.
    fn liveness_strategies(&self) -> Vec<LivenessStrategy>;

    /// Settle delay to apply before the post-launch liveness probe, to
    /// absorb async crash-on-boot.
    fn post_launch_settle(&self) -> Duration;

    /// Pid recorded by the last successful launch, if any.
    fn recorded_pid(&self) -> Option<i32>;

    /// Reloads configuration in place. Drivers for controller-fronted
    /// services override this; everything else reports unsupported.
    async fn reload(&self) -> Result<(), DriverError>;
}
