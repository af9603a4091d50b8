//! convoy_lifecycle - the managed-resource lifecycle state machine.
//!
//! A [`ManagedResource`] owns one [`Driver`] instance per run and moves it
//! through `install -> customize -> launch -> verify`. Steps within one
//! resource are strictly sequential; independent resources run their
//! lifecycles fully in parallel on separate tasks.

use convoy_driver::{Driver, DriverError, DriverFactory, Platform, ResourceKind};
use convoy_remote::TaskExecutor;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub mod attributes;

pub use attributes::{keys, AttributeStore, InMemoryAttributes};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid {op}() from state {from} for {resource}")]
    InvalidTransition {
        resource: String,
        op: &'static str,
        from: Lifecycle,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("no liveness strategy configured for {resource}")]
    NoLivenessStrategy { resource: String },

    #[error("liveness check ({strategy}) failed for {resource} after launch")]
    LivenessCheckFailed { resource: String, strategy: String },
}

/// Lifecycle state of a managed resource. Transitions are monotonic along
/// CREATED -> STARTING -> RUNNING -> STOPPING -> STOPPED, with ERROR
/// reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Lifecycle::Created => "created",
            Lifecycle::Starting => "starting",
            Lifecycle::Running => "running",
            Lifecycle::Stopping => "stopping",
            Lifecycle::Stopped => "stopped",
            Lifecycle::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Where a resource runs.
#[derive(Debug, Clone)]
pub struct Location {
    pub host: String,
    pub platform: Platform,
}

/// A modeled unit of deployment bound to one location, driving one
/// process through its lifecycle.
pub struct ManagedResource {
    id: String,
    kind: ResourceKind,
    location: Location,
    port: Option<u16>,
    executor: TaskExecutor,
    factory: Arc<dyn DriverFactory>,
    attributes: Arc<dyn AttributeStore>,
    state: std::sync::Mutex<Lifecycle>,
    // Serializes lifecycle operations on this resource.
    op_lock: Mutex<()>,
    // Built lazily on start; discarded and recreated on restart.
    driver: Mutex<Option<Arc<dyn Driver>>>,
}

impl ManagedResource {
    pub fn new(
        id: impl Into<String>,
        kind: ResourceKind,
        location: Location,
        port: Option<u16>,
        executor: TaskExecutor,
        factory: Arc<dyn DriverFactory>,
        attributes: Arc<dyn AttributeStore>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            location,
            port,
            executor,
            factory,
            attributes,
            state: std::sync::Mutex::new(Lifecycle::Created),
            op_lock: Mutex::new(()),
            driver: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn state(&self) -> Lifecycle {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The driver of the current run, if one has been built.
    pub async fn driver(&self) -> Option<Arc<dyn Driver>> {
        self.driver.lock().await.clone()
    }

    /// Externally reachable address, when a port is configured.
    pub fn address(&self) -> Option<String> {
        self.port.map(|port| format!("{}:{port}", self.location.host))
    }

    async fn set_state(&self, state: Lifecycle) {
        {
            let mut current = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = state;
        }
        self.attributes
            .set(&self.id, keys::STATE, state.to_string())
            .await;
    }

    /// Starts the resource: CREATED|STOPPED -> STARTING -> RUNNING, or
    /// ERROR with the failure surfaced. Never retries on its own.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;
        self.start_locked().await
    }

    /// Stops the resource: RUNNING|STARTING -> STOPPING -> STOPPED.
    /// Stopping a CREATED or STOPPED resource succeeds without touching
    /// the transport. ERROR is accepted as best-effort cleanup.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;
        self.stop_locked().await
    }

    /// Stop then start. Only valid from RUNNING or STOPPED. A failed stop
    /// is logged and start is attempted anyway - a stuck process may be
    /// replaced regardless.
    pub async fn restart(&self) -> Result<(), LifecycleError> {
        let _op = self.op_lock.lock().await;
        let from = self.state();
        if !matches!(from, Lifecycle::Running | Lifecycle::Stopped) {
            return Err(LifecycleError::InvalidTransition {
                resource: self.id.clone(),
                op: "restart",
                from,
            });
        }

        if from == Lifecycle::Running {
            if let Err(e) = self.stop_locked().await {
                warn!(
                    resource = %self.id,
                    error = %e,
                    "stop failed during restart, proceeding to start"
                );
                self.set_state(Lifecycle::Stopped).await;
            }
        }

        // The old driver's run is over; start builds a fresh one.
        *self.driver.lock().await = None;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<(), LifecycleError> {
        let from = self.state();
        if !matches!(from, Lifecycle::Created | Lifecycle::Stopped) {
            return Err(LifecycleError::InvalidTransition {
                resource: self.id.clone(),
                op: "start",
                from,
            });
        }

        info!(resource = %self.id, kind = %self.kind, host = %self.location.host, "starting");
        self.set_state(Lifecycle::Starting).await;

        match self.start_sequence().await {
            Ok(driver) => {
                self.set_state(Lifecycle::Running).await;
                self.attributes
                    .set(&self.id, keys::SERVICE_UP, "true".to_string())
                    .await;
                if let Some(pid) = driver.recorded_pid() {
                    self.attributes
                        .set(&self.id, keys::PID, pid.to_string())
                        .await;
                }
                if let Some(address) = self.address() {
                    self.attributes.set(&self.id, keys::ADDRESS, address).await;
                }
                info!(resource = %self.id, "running");
                Ok(())
            }
            Err(e) => {
                error!(resource = %self.id, error = %e, "start failed");
                self.set_state(Lifecycle::Error).await;
                self.attributes
                    .set(&self.id, keys::SERVICE_UP, "false".to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn start_sequence(&self) -> Result<Arc<dyn Driver>, LifecycleError> {
        let driver = self.factory.build(
            &self.kind,
            self.location.platform,
            self.executor.clone(),
            &self.id,
        )?;
        *self.driver.lock().await = Some(driver.clone());

        driver.install().await?;
        driver.customize().await?;
        driver.launch().await?;

        // Post-launch verification: the first strategy whose precondition
        // is configured decides. No strategy at all is a configuration
        // error, not silent health.
        let strategies = driver.liveness_strategies();
        let strategy = strategies
            .first()
            .ok_or_else(|| LifecycleError::NoLivenessStrategy {
                resource: self.id.clone(),
            })?;

        tokio::time::sleep(driver.post_launch_settle()).await;
        if driver.is_running().await? {
            Ok(driver)
        } else {
            Err(LifecycleError::LivenessCheckFailed {
                resource: self.id.clone(),
                strategy: strategy.describe(),
            })
        }
    }

    async fn stop_locked(&self) -> Result<(), LifecycleError> {
        let from = self.state();
        match from {
            Lifecycle::Created | Lifecycle::Stopped => return Ok(()),
            Lifecycle::Running | Lifecycle::Starting | Lifecycle::Error => {}
            Lifecycle::Stopping => {
                return Err(LifecycleError::InvalidTransition {
                    resource: self.id.clone(),
                    op: "stop",
                    from,
                })
            }
        }

        info!(resource = %self.id, "stopping");
        self.set_state(Lifecycle::Stopping).await;

        let driver = self.driver.lock().await.clone();
        let result = match &driver {
            // Nothing was ever launched in this process's lifetime.
            None => Ok(()),
            Some(driver) => driver.stop().await,
        };

        match result {
            Ok(()) => {
                self.set_state(Lifecycle::Stopped).await;
                self.attributes
                    .set(&self.id, keys::SERVICE_UP, "false".to_string())
                    .await;
                info!(resource = %self.id, "stopped");
                Ok(())
            }
            Err(e) => {
                error!(resource = %self.id, error = %e, "stop failed");
                self.set_state(Lifecycle::Error).await;
                Err(e.into())
            }
        }
    }
}
