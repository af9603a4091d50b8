//! Wires a blueprint into live resources and an optional proxy controller.

use convoy_config::{Blueprint, ResourceSpec};
use convoy_controller::{
    template_renderer, AttributeBackedGroup, MembershipTracker, ProxyController,
    ReconciliationEngine, ResourceReload,
};
use convoy_driver::DriverRegistry;
use convoy_lifecycle::{AttributeStore, InMemoryAttributes, Location, ManagedResource};
use convoy_remote::{ExecTransport, HostMutexes, LocalTransport, SshTransport, TaskExecutor};
use std::sync::Arc;

pub struct Deployment {
    pub backends: Vec<Arc<ManagedResource>>,
    pub controller: Option<ProxyController>,
    pub registry: Arc<DriverRegistry>,
    mutexes: Arc<HostMutexes>,
}

fn transport_for(spec: &ResourceSpec) -> Arc<dyn ExecTransport> {
    if spec.host == "localhost" || spec.host == "127.0.0.1" {
        Arc::new(LocalTransport::new())
    } else {
        let mut transport = SshTransport::new(spec.host.clone());
        if let Some(user) = &spec.user {
            transport = transport.with_user(user.clone());
        }
        Arc::new(transport)
    }
}

impl Deployment {
    pub fn from_blueprint(blueprint: &Blueprint) -> Self {
        let mutexes = Arc::new(HostMutexes::new());
        let attributes: Arc<dyn AttributeStore> = Arc::new(InMemoryAttributes::new());

        let mut registry = DriverRegistry::new();
        for service in &blueprint.services {
            registry.register(service.clone());
        }
        let registry = Arc::new(registry);

        let proxy_id = blueprint.proxy.as_ref().map(|p| p.resource.clone());
        let mut backends = Vec::new();
        let mut proxy_resource = None;

        for spec in &blueprint.resources {
            let executor = TaskExecutor::new(transport_for(spec), mutexes.clone());
            let resource = Arc::new(ManagedResource::new(
                spec.id.clone(),
                spec.kind.clone(),
                Location {
                    host: spec.host.clone(),
                    platform: spec.platform,
                },
                spec.port,
                executor,
                registry.clone(),
                attributes.clone(),
            ));
            if Some(&spec.id) == proxy_id.as_ref() {
                proxy_resource = Some(resource);
            } else {
                backends.push(resource);
            }
        }

        let controller = match (&blueprint.proxy, proxy_resource) {
            (Some(proxy), Some(resource)) => {
                let roster = blueprint
                    .proxy_backends()
                    .iter()
                    .map(|spec| (spec.id.clone(), spec.host.clone(), spec.port))
                    .collect();
                let group = Arc::new(AttributeBackedGroup::new(roster, attributes.clone()));
                let tracker = Arc::new(MembershipTracker::new(group));
                let proxy_spec = blueprint
                    .resources
                    .iter()
                    .find(|r| r.id == proxy.resource)
                    .cloned();
                let executor = match &proxy_spec {
                    Some(spec) => TaskExecutor::new(transport_for(spec), mutexes.clone()),
                    None => TaskExecutor::new(Arc::new(LocalTransport::new()), mutexes.clone()),
                };
                let engine = Arc::new(ReconciliationEngine::new(
                    tracker.clone(),
                    executor,
                    template_renderer(proxy.template.clone(), proxy.server_line.clone()),
                    proxy.artifact_path.clone(),
                    Arc::new(ResourceReload::new(resource.clone())),
                ));
                Some(ProxyController::new(resource, tracker, engine))
            }
            _ => None,
        };

        Self {
            backends,
            controller,
            registry,
            mutexes,
        }
    }

    /// A driver-level executor for one spec, used by `down` where no
    /// lifecycle state from a previous process exists.
    pub fn executor_for(&self, spec: &ResourceSpec) -> TaskExecutor {
        TaskExecutor::new(transport_for(spec), self.mutexes.clone())
    }
}
