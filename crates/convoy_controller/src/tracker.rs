//! Membership tracking.
//!
//! Maintains the filtered, live-updated view of a group's members as a
//! map from resource id to reachable address. Mutated only by the owning
//! tracker; read by the reconciliation pass.

use crate::group::{Member, MemberGroup, MembershipEvent};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Decides whether a member belongs in the tracked set. The second
/// argument says whether the backing group currently lists the member.
pub type InclusionPredicate = Arc<dyn Fn(&Member, bool) -> bool + Send + Sync>;

/// Default predicate: the member's service is up and it is still a
/// current member of the group.
pub fn service_up_and_member() -> InclusionPredicate {
    Arc::new(|member, is_member| member.service_up && is_member)
}

pub struct MembershipTracker {
    group: Mutex<Arc<dyn MemberGroup>>,
    predicate: InclusionPredicate,
    members: Mutex<BTreeMap<String, String>>,
}

impl MembershipTracker {
    pub fn new(group: Arc<dyn MemberGroup>) -> Self {
        Self::with_predicate(group, service_up_and_member())
    }

    pub fn with_predicate(group: Arc<dyn MemberGroup>, predicate: InclusionPredicate) -> Self {
        Self {
            group: Mutex::new(group),
            predicate,
            members: Mutex::new(BTreeMap::new()),
        }
    }

    /// Binds a different backing group and rebuilds the set from its
    /// snapshot. Bind-time correctness takes priority over listener
    /// latency.
    pub async fn bind(&self, group: Arc<dyn MemberGroup>) {
        *self.group.lock().await = group;
        self.reset().await;
    }

    /// Clears and rebuilds the set synchronously from the group's current
    /// member snapshot. Used on controller start and on rebind, so no
    /// window of stale listener-driven state is served.
    pub async fn reset(&self) {
        let group = self.group.lock().await.clone();
        let snapshot = group.members().await;

        let mut members = self.members.lock().await;
        members.clear();
        for member in &snapshot {
            if (self.predicate)(member, true) {
                if let Some(address) = member.address() {
                    members.insert(member.id.clone(), address);
                } else {
                    error!(member = %member.id, "cannot derive host:port for member, skipping");
                }
            }
        }
        info!(members = members.len(), "reset membership from group snapshot");
    }

    /// Applies one membership event. Returns true when the tracked set
    /// changed. Duplicate adds and removes of unknown members are safe
    /// no-ops.
    pub async fn on_event(&self, event: MembershipEvent) -> bool {
        let member = event.member().clone();
        let is_member = match &event {
            MembershipEvent::Removed(_) => false,
            _ => {
                let group = self.group.lock().await.clone();
                group.contains(&member.id).await
            }
        };

        let include = match &event {
            MembershipEvent::Removed(_) => false,
            MembershipEvent::Added(_) | MembershipEvent::Changed(_) => {
                (self.predicate)(&member, is_member)
            }
        };

        let mut members = self.members.lock().await;
        if include {
            let Some(address) = member.address() else {
                error!(member = %member.id, "cannot derive host:port for member, skipping");
                return false;
            };
            match members.insert(member.id.clone(), address.clone()) {
                Some(previous) if previous == address => false,
                _ => {
                    info!(member = %member.id, %address, "adding member to tracked set");
                    true
                }
            }
        } else {
            match members.remove(&member.id) {
                Some(address) => {
                    info!(member = %member.id, %address, "removing member from tracked set");
                    true
                }
                None => {
                    debug!(member = %member.id, "event for untracked member, ignoring");
                    false
                }
            }
        }
    }

    /// The current set of reachable addresses, ordered.
    pub async fn current_addresses(&self) -> BTreeSet<String> {
        self.members.lock().await.values().cloned().collect()
    }

    /// Ids of currently tracked members, ordered.
    pub async fn tracked_ids(&self) -> BTreeSet<String> {
        self.members.lock().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::StaticGroup;

    async fn tracker_with(members: Vec<Member>) -> (Arc<StaticGroup>, MembershipTracker) {
        let group = Arc::new(StaticGroup::new());
        group.set_members(members).await;
        let tracker = MembershipTracker::new(group.clone());
        tracker.reset().await;
        (group, tracker)
    }

    fn up_member(id: &str, host: &str) -> Member {
        Member::new(id).up(true).at(host, 8080)
    }

    #[tokio::test]
    async fn test_reset_filters_by_predicate() {
        // Only members whose service is up make it into the set.
        let (_, tracker) = tracker_with(vec![
            up_member("a", "10.0.0.1"),
            Member::new("b").up(false).at("10.0.0.2", 8080),
        ])
        .await;

        let addresses = tracker.current_addresses().await;
        assert_eq!(addresses.len(), 1);
        assert!(addresses.contains("10.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_down_member_add_is_ignored_until_changed_up() {
        let (group, tracker) = tracker_with(vec![up_member("a", "10.0.0.1")]).await;

        // Adding b with service down leaves the set unchanged.
        let b_down = Member::new("b").up(false).at("10.0.0.2", 8080);
        group.add(b_down.clone()).await;
        assert!(!tracker.on_event(MembershipEvent::Added(b_down)).await);
        assert_eq!(tracker.current_addresses().await.len(), 1);

        // Toggling b up and delivering the change adds addr(b).
        let b_up = up_member("b", "10.0.0.2");
        assert!(tracker.on_event(MembershipEvent::Changed(b_up)).await);
        let addresses = tracker.current_addresses().await;
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains("10.0.0.2:8080"));
    }

    #[tokio::test]
    async fn test_duplicate_add_is_noop() {
        let (_, tracker) = tracker_with(vec![up_member("a", "10.0.0.1")]).await;
        let changed = tracker
            .on_event(MembershipEvent::Added(up_member("a", "10.0.0.1")))
            .await;
        assert!(!changed);
        assert_eq!(tracker.current_addresses().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_before_add_is_noop() {
        let (_, tracker) = tracker_with(vec![]).await;
        let changed = tracker
            .on_event(MembershipEvent::Removed(up_member("ghost", "10.0.0.9")))
            .await;
        assert!(!changed);
        assert!(tracker.current_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_changed_to_down_removes() {
        let (_, tracker) = tracker_with(vec![up_member("a", "10.0.0.1")]).await;
        let changed = tracker
            .on_event(MembershipEvent::Changed(
                Member::new("a").up(false).at("10.0.0.1", 8080),
            ))
            .await;
        assert!(changed);
        assert!(tracker.current_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_departed_member_fails_membership_check() {
        let (group, tracker) = tracker_with(vec![up_member("a", "10.0.0.1")]).await;
        group.remove("a").await;
        // Still claims to be up, but the group no longer lists it.
        let changed = tracker
            .on_event(MembershipEvent::Changed(up_member("a", "10.0.0.1")))
            .await;
        assert!(changed);
        assert!(tracker.current_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_converges_regardless_of_event_order() {
        let (group, tracker) = tracker_with(vec![]).await;
        let a = up_member("a", "10.0.0.1");
        let b = up_member("b", "10.0.0.2");
        group.set_members(vec![a.clone(), b.clone()]).await;

        // Interleaved order across distinct members, including a stray
        // early remove and a duplicate add.
        tracker.on_event(MembershipEvent::Removed(b.clone())).await;
        tracker.on_event(MembershipEvent::Added(b.clone())).await;
        tracker.on_event(MembershipEvent::Added(a.clone())).await;
        tracker.on_event(MembershipEvent::Added(a.clone())).await;
        tracker.on_event(MembershipEvent::Changed(b.clone())).await;

        let addresses = tracker.current_addresses().await;
        assert_eq!(addresses.len(), 2);
        assert!(addresses.contains("10.0.0.1:8080"));
        assert!(addresses.contains("10.0.0.2:8080"));
        let ids = tracker.tracked_ids().await;
        assert!(ids.contains("a") && ids.contains("b"));
    }

    #[tokio::test]
    async fn test_member_without_address_is_skipped() {
        let (group, tracker) = tracker_with(vec![]).await;
        let nameless = Member::new("a").up(true);
        group.add(nameless.clone()).await;
        let changed = tracker.on_event(MembershipEvent::Added(nameless)).await;
        assert!(!changed);
        assert!(tracker.current_addresses().await.is_empty());
    }

    #[tokio::test]
    async fn test_bind_swaps_group_and_rebuilds() {
        let (_, tracker) = tracker_with(vec![up_member("a", "10.0.0.1")]).await;

        let other = Arc::new(StaticGroup::new());
        other.set_members(vec![up_member("x", "10.0.1.1")]).await;
        tracker.bind(other).await;

        let addresses = tracker.current_addresses().await;
        assert_eq!(addresses.len(), 1);
        assert!(addresses.contains("10.0.1.1:8080"));
    }
}
