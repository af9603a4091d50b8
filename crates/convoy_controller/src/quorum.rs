//! Seed selection for distributed bootstrap.
//!
//! Some clustered services need a minimum set of bootstrap members before
//! the cluster counts as formed. [`SeedQuorum`] gathers the first members
//! that come up until the quorum is reached; once formed, the seed set is
//! sticky so later membership churn does not re-seed a live cluster.

use crate::group::Member;
use std::collections::BTreeSet;
use tokio::sync::Mutex;
use tracing::info;

pub const DEFAULT_SEED_QUORUM: usize = 2;

pub struct SeedQuorum {
    quorum: usize,
    chosen: Mutex<Option<BTreeSet<String>>>,
}

impl SeedQuorum {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            chosen: Mutex::new(None),
        }
    }

    /// Considers the current members as seed candidates. Returns the seed
    /// set once at least `quorum` members are up, and `None` while the
    /// cluster is still forming. The first formed set wins.
    pub async fn gather(&self, members: &[Member]) -> Option<BTreeSet<String>> {
        let mut chosen = self.chosen.lock().await;
        if let Some(seeds) = chosen.as_ref() {
            return Some(seeds.clone());
        }

        let up: BTreeSet<String> = members
            .iter()
            .filter(|m| m.service_up)
            .map(|m| m.id.clone())
            .take(self.quorum)
            .collect();
        if up.len() < self.quorum {
            return None;
        }

        info!(seeds = ?up, "seed quorum formed");
        *chosen = Some(up.clone());
        Some(up)
    }

    pub async fn current(&self) -> Option<BTreeSet<String>> {
        self.chosen.lock().await.clone()
    }

    pub async fn is_formed(&self) -> bool {
        self.chosen.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn up(id: &str) -> Member {
        Member::new(id).up(true).at("10.0.0.1", 7000)
    }

    #[tokio::test]
    async fn test_not_formed_below_quorum() {
        let quorum = SeedQuorum::new(2);
        assert_eq!(quorum.gather(&[up("a")]).await, None);
        assert!(!quorum.is_formed().await);
    }

    #[tokio::test]
    async fn test_down_members_are_not_candidates() {
        let quorum = SeedQuorum::new(2);
        let members = vec![up("a"), Member::new("b").up(false)];
        assert_eq!(quorum.gather(&members).await, None);
    }

    #[tokio::test]
    async fn test_forms_at_quorum_and_stays_sticky() {
        let quorum = SeedQuorum::new(2);
        let seeds = quorum.gather(&[up("a"), up("b"), up("c")]).await.unwrap();
        assert_eq!(seeds.len(), 2);

        // Later churn does not change the chosen seeds.
        let later = quorum.gather(&[up("c"), up("d")]).await.unwrap();
        assert_eq!(later, seeds);
        assert_eq!(quorum.current().await, Some(seeds));
    }
}
