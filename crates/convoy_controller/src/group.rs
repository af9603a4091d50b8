//! Group membership source collaborator.

use async_trait::async_trait;
use convoy_lifecycle::{keys, AttributeStore};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Snapshot of one group member as seen by trackers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub service_up: bool,
    pub hostname: Option<String>,
    pub port: Option<u16>,
}

impl Member {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service_up: false,
            hostname: None,
            port: None,
        }
    }

    pub fn up(mut self, up: bool) -> Self {
        self.service_up = up;
        self
    }

    pub fn at(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = Some(hostname.into());
        self.port = Some(port);
        self
    }

    /// `host:port` when both parts are known.
    pub fn address(&self) -> Option<String> {
        match (&self.hostname, self.port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

/// Membership change delivered by the backing group's event feed.
#[derive(Debug, Clone)]
pub enum MembershipEvent {
    Added(Member),
    Removed(Member),
    Changed(Member),
}

impl MembershipEvent {
    pub fn member(&self) -> &Member {
        match self {
            MembershipEvent::Added(m)
            | MembershipEvent::Removed(m)
            | MembershipEvent::Changed(m) => m,
        }
    }
}

/// The backing group: a current-members snapshot plus an event feed the
/// caller pumps into the tracker. The tracker is a pure consumer.
#[async_trait]
pub trait MemberGroup: Send + Sync {
    async fn members(&self) -> Vec<Member>;

    async fn contains(&self, id: &str) -> bool {
        self.members().await.iter().any(|m| m.id == id)
    }
}

/// Group over a fixed roster whose `service_up` and address are read from
/// the attribute store the members' lifecycles publish into.
pub struct AttributeBackedGroup {
    roster: Vec<(String, String, Option<u16>)>,
    attributes: Arc<dyn AttributeStore>,
}

impl AttributeBackedGroup {
    /// `roster` entries are `(resource id, hostname, port)`.
    pub fn new(
        roster: Vec<(String, String, Option<u16>)>,
        attributes: Arc<dyn AttributeStore>,
    ) -> Self {
        Self { roster, attributes }
    }
}

#[async_trait]
impl MemberGroup for AttributeBackedGroup {
    async fn members(&self) -> Vec<Member> {
        let mut members = Vec::with_capacity(self.roster.len());
        for (id, hostname, port) in &self.roster {
            let service_up = self
                .attributes
                .get(id, keys::SERVICE_UP)
                .await
                .map(|v| v == "true")
                .unwrap_or(false);
            members.push(Member {
                id: id.clone(),
                service_up,
                hostname: Some(hostname.clone()),
                port: *port,
            });
        }
        members
    }
}

/// Scriptable group for tests and ad-hoc wiring.
#[derive(Default)]
pub struct StaticGroup {
    members: Mutex<Vec<Member>>,
}

impl StaticGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_members(&self, members: Vec<Member>) {
        *self.members.lock().await = members;
    }

    pub async fn add(&self, member: Member) {
        self.members.lock().await.push(member);
    }

    pub async fn remove(&self, id: &str) {
        self.members.lock().await.retain(|m| m.id != id);
    }
}

#[async_trait]
impl MemberGroup for StaticGroup {
    async fn members(&self) -> Vec<Member> {
        self.members.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_lifecycle::InMemoryAttributes;

    #[test]
    fn test_member_address() {
        assert_eq!(
            Member::new("a").at("10.0.0.5", 8080).address().as_deref(),
            Some("10.0.0.5:8080")
        );
        assert_eq!(Member::new("a").address(), None);
    }

    #[tokio::test]
    async fn test_attribute_backed_group_reads_service_up() {
        let attributes = Arc::new(InMemoryAttributes::new());
        attributes
            .set("web-1", keys::SERVICE_UP, "true".to_string())
            .await;
        let group = AttributeBackedGroup::new(
            vec![
                ("web-1".to_string(), "10.0.0.5".to_string(), Some(8080)),
                ("web-2".to_string(), "10.0.0.6".to_string(), Some(8080)),
            ],
            attributes,
        );

        let members = group.members().await;
        assert!(members[0].service_up);
        assert!(!members[1].service_up);
        assert!(group.contains("web-2").await);
        assert!(!group.contains("web-9").await);
    }
}
