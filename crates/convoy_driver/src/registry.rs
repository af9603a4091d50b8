//! Driver dispatch table.
//!
//! An explicit registry object keyed by (resource kind, platform),
//! populated from the blueprint and passed into resource constructors.
//! No runtime discovery, no global state.

use crate::service::{ServiceDefinition, ShellServiceDriver};
use crate::{Driver, DriverError, Platform, ResourceKind};
use convoy_remote::TaskExecutor;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds the driver for a resource at construction time.
pub trait DriverFactory: Send + Sync {
    fn build(
        &self,
        kind: &ResourceKind,
        platform: Platform,
        executor: TaskExecutor,
        resource: &str,
    ) -> Result<Arc<dyn Driver>, DriverError>;
}

/// Table of service definitions, one per (kind, platform).
#[derive(Default)]
pub struct DriverRegistry {
    definitions: HashMap<(ResourceKind, Platform), ServiceDefinition>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition under its own (kind, platform) key. A later
    /// registration for the same key replaces the earlier one.
    pub fn register(&mut self, definition: ServiceDefinition) {
        self.definitions.insert(
            (definition.kind.clone(), definition.platform),
            definition,
        );
    }

    pub fn get(&self, kind: &ResourceKind, platform: Platform) -> Option<&ServiceDefinition> {
        self.definitions.get(&(kind.clone(), platform))
    }
}

impl DriverFactory for DriverRegistry {
    fn build(
        &self,
        kind: &ResourceKind,
        platform: Platform,
        executor: TaskExecutor,
        resource: &str,
    ) -> Result<Arc<dyn Driver>, DriverError> {
        let definition = self
            .get(kind, platform)
            .ok_or_else(|| DriverError::UnknownDriver {
                kind: kind.clone(),
                platform,
            })?;
        Ok(Arc::new(ShellServiceDriver::new(
            definition.clone(),
            executor,
            resource,
        )))
    }
}
