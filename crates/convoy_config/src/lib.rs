//! convoy_config - blueprint loading.
//!
//! A blueprint is the TOML description of one deployment: the service
//! definitions (how each kind is driven), the resources to place, and
//! optionally a proxy section fronting a set of backends.

use convoy_driver::{Platform, ResourceKind, ServiceDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read blueprint: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse blueprint: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid blueprint: {0}")]
    Invalid(String),
}

/// One resource placement: an instance of a service kind on a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub id: String,
    pub kind: ResourceKind,
    pub host: String,
    pub platform: Platform,
    #[serde(default)]
    pub port: Option<u16>,
    /// Login user for ssh hosts.
    #[serde(default)]
    pub user: Option<String>,
}

fn default_server_line() -> String {
    "  server {{address}};".to_string()
}

/// Proxy section: which resource fronts which backends, and how the
/// generated artifact looks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Resource id of the fronting load balancer.
    pub resource: String,
    /// Backend resource ids; empty means every other resource.
    #[serde(default)]
    pub backends: Vec<String>,
    /// Remote path the generated artifact is pushed to.
    pub artifact_path: String,
    /// Artifact template; `{{servers}}` expands to one line per backend.
    pub template: String,
    #[serde(default = "default_server_line")]
    pub server_line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub resources: Vec<ResourceSpec>,
    #[serde(default)]
    pub proxy: Option<ProxySpec>,
}

impl Blueprint {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let blueprint: Blueprint = toml::from_str(&content)?;
        blueprint.validate()?;
        Ok(blueprint)
    }

    pub fn load_from_dir(dir: &Path) -> Result<Self, ConfigError> {
        Self::load(&dir.join("convoy.toml"))
    }

    /// Backend specs the proxy fronts: the listed ones, or every resource
    /// except the proxy itself when none are listed.
    pub fn proxy_backends(&self) -> Vec<&ResourceSpec> {
        let Some(proxy) = &self.proxy else {
            return Vec::new();
        };
        if proxy.backends.is_empty() {
            self.resources
                .iter()
                .filter(|r| r.id != proxy.resource)
                .collect()
        } else {
            self.resources
                .iter()
                .filter(|r| proxy.backends.contains(&r.id))
                .collect()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ids = HashSet::new();
        for resource in &self.resources {
            if !ids.insert(&resource.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate resource id {:?}",
                    resource.id
                )));
            }
        }

        for resource in &self.resources {
            let known = self
                .services
                .iter()
                .any(|s| s.kind == resource.kind && s.platform == resource.platform);
            if !known {
                return Err(ConfigError::Invalid(format!(
                    "resource {:?} references unknown service kind {} on {}",
                    resource.id, resource.kind, resource.platform
                )));
            }
        }

        if let Some(proxy) = &self.proxy {
            if !ids.contains(&proxy.resource) {
                return Err(ConfigError::Invalid(format!(
                    "proxy references unknown resource {:?}",
                    proxy.resource
                )));
            }
            for backend in &proxy.backends {
                if !ids.contains(backend) {
                    return Err(ConfigError::Invalid(format!(
                        "proxy references unknown backend {backend:?}"
                    )));
                }
            }
        }
        Ok(())
    }
}
