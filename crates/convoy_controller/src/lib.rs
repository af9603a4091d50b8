//! convoy_controller - keeps a derived configuration artifact in sync
//! with the live membership of a resource group.
//!
//! A [`ProxyController`] fronts a group of backend resources with a
//! load-balancer style [`ManagedResource`]: the [`MembershipTracker`]
//! maintains the filtered address set, and the [`ReconciliationEngine`]
//! regenerates, fingerprints, pushes and reloads the fronted service's
//! configuration whenever the visible set actually changed.

use async_trait::async_trait;
use convoy_driver::DriverError;
use convoy_lifecycle::{LifecycleError, ManagedResource};
use convoy_remote::ExecError;
use std::sync::Arc;
use thiserror::Error;

pub mod group;
pub mod quorum;
pub mod reconcile;
pub mod tracker;

pub use group::{AttributeBackedGroup, Member, MemberGroup, MembershipEvent, StaticGroup};
pub use quorum::{SeedQuorum, DEFAULT_SEED_QUORUM};
pub use reconcile::{
    template_renderer, ArtifactRenderer, ConfigArtifact, ReconciliationEngine, Reloadable,
    SideInstall,
};
pub use tracker::{service_up_and_member, InclusionPredicate, MembershipTracker};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("failed to push configuration artifact to {path}")]
    PushFailed {
        path: String,
        #[source]
        source: ExecError,
    },

    #[error("failed to reload fronted service")]
    ReloadFailed(#[source] DriverError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Reload action backed by the fronted resource's current driver.
pub struct ResourceReload {
    resource: Arc<ManagedResource>,
}

impl ResourceReload {
    pub fn new(resource: Arc<ManagedResource>) -> Self {
        Self { resource }
    }
}

#[async_trait]
impl Reloadable for ResourceReload {
    async fn reload(&self) -> Result<(), DriverError> {
        match self.resource.driver().await {
            Some(driver) => driver.reload().await,
            None => Err(DriverError::NoDriver {
                resource: self.resource.id().to_string(),
            }),
        }
    }
}

/// Controller resource fronting a group of backends.
pub struct ProxyController {
    resource: Arc<ManagedResource>,
    tracker: Arc<MembershipTracker>,
    engine: Arc<ReconciliationEngine>,
}

impl ProxyController {
    pub fn new(
        resource: Arc<ManagedResource>,
        tracker: Arc<MembershipTracker>,
        engine: Arc<ReconciliationEngine>,
    ) -> Self {
        Self {
            resource,
            tracker,
            engine,
        }
    }

    pub fn resource(&self) -> &Arc<ManagedResource> {
        &self.resource
    }

    pub fn tracker(&self) -> &Arc<MembershipTracker> {
        &self.tracker
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    /// Starts the fronted service, then initializes membership from the
    /// group's current snapshot, goes active, and pushes the initial
    /// configuration. The snapshot is authoritative: events delivered
    /// before this point are safely ignorable.
    pub async fn start(&self) -> Result<(), ControllerError> {
        self.resource.start().await?;
        self.tracker.reset().await;
        self.engine.activate().await;
        self.engine.reconcile().await?;
        Ok(())
    }

    /// Deactivates reconciliation, then stops the fronted service.
    pub async fn stop(&self) -> Result<(), ControllerError> {
        self.engine.deactivate().await;
        self.resource.stop().await?;
        Ok(())
    }

    /// Feeds one membership event through the tracker; reconciles only
    /// when the tracked set actually changed.
    pub async fn on_membership_event(
        &self,
        event: MembershipEvent,
    ) -> Result<bool, ControllerError> {
        if self.tracker.on_event(event).await {
            self.engine.reconcile().await
        } else {
            Ok(false)
        }
    }
}
