//! Attribute store collaborator.
//!
//! The lifecycle publishes recorded pid, state and reachability here;
//! controllers read member attributes from it. Delivery and propagation
//! semantics are the collaborator's concern - this is a plain key-value
//! interface.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Well-known attribute keys published by the lifecycle.
pub mod keys {
    pub const STATE: &str = "resource.state";
    pub const PID: &str = "resource.pid";
    pub const SERVICE_UP: &str = "service.up";
    pub const ADDRESS: &str = "host.address";
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn get(&self, resource: &str, key: &str) -> Option<String>;
    async fn set(&self, resource: &str, key: &str, value: String);
}

/// In-process store used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryAttributes {
    values: Mutex<HashMap<(String, String), String>>,
}

impl InMemoryAttributes {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttributeStore for InMemoryAttributes {
    async fn get(&self, resource: &str, key: &str) -> Option<String> {
        self.values
            .lock()
            .await
            .get(&(resource.to_string(), key.to_string()))
            .cloned()
    }

    async fn set(&self, resource: &str, key: &str, value: String) {
        self.values
            .lock()
            .await
            .insert((resource.to_string(), key.to_string()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_roundtrip() {
        let store = InMemoryAttributes::new();
        store.set("web-1", keys::SERVICE_UP, "true".to_string()).await;
        assert_eq!(
            store.get("web-1", keys::SERVICE_UP).await.as_deref(),
            Some("true")
        );
        assert_eq!(store.get("web-2", keys::SERVICE_UP).await, None);
    }
}
