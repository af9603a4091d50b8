//! Reconciliation engine.
//!
//! Regenerates the configuration artifact from the tracked membership,
//! compares fingerprints to suppress no-op pushes, and pushes + reloads
//! when something actually changed. Never half-applies: on a failed push
//! or reload the recorded fingerprint stays stale, so the next pass
//! retries the same change instead of treating it as applied.

use crate::tracker::MembershipTracker;
use crate::ControllerError;
use async_trait::async_trait;
use convoy_driver::DriverError;
use convoy_remote::TaskExecutor;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A generated configuration blob plus its content fingerprint. Created
/// fresh on every reconciliation pass, never mutated in place.
#[derive(Debug, Clone)]
pub struct ConfigArtifact {
    pub text: String,
    pub fingerprint: String,
}

impl ConfigArtifact {
    pub fn generate(text: String) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let fingerprint = format!("{:x}", hasher.finalize());
        Self { text, fingerprint }
    }
}

/// Renders the artifact text from the current address set plus whatever
/// static configuration the closure captured.
pub type ArtifactRenderer = Arc<dyn Fn(&BTreeSet<String>) -> String + Send + Sync>;

/// The fronted service's reload action.
#[async_trait]
pub trait Reloadable: Send + Sync {
    async fn reload(&self) -> Result<(), DriverError>;
}

/// One-time side-install (e.g. credential material) keyed by a logical
/// id. Installed at most once per controller lifetime; never triggers a
/// reload by itself.
#[derive(Debug, Clone)]
pub struct SideInstall {
    pub key: String,
    pub bytes: Vec<u8>,
    pub remote_path: String,
    pub mode: Option<String>,
}

struct EngineState {
    active: bool,
    pending: bool,
    last_fingerprint: Option<String>,
    // Append-only for the lifetime of the controller resource.
    installed: BTreeSet<String>,
}

pub struct ReconciliationEngine {
    tracker: Arc<MembershipTracker>,
    executor: TaskExecutor,
    renderer: ArtifactRenderer,
    artifact_path: String,
    reload: Arc<dyn Reloadable>,
    side_installs: Vec<SideInstall>,
    state: Mutex<EngineState>,
}

impl ReconciliationEngine {
    pub fn new(
        tracker: Arc<MembershipTracker>,
        executor: TaskExecutor,
        renderer: ArtifactRenderer,
        artifact_path: impl Into<String>,
        reload: Arc<dyn Reloadable>,
    ) -> Self {
        Self {
            tracker,
            executor,
            renderer,
            artifact_path: artifact_path.into(),
            reload,
            side_installs: Vec::new(),
            state: Mutex::new(EngineState {
                active: false,
                pending: false,
                last_fingerprint: None,
                installed: BTreeSet::new(),
            }),
        }
    }

    pub fn with_side_installs(mut self, side_installs: Vec<SideInstall>) -> Self {
        self.side_installs = side_installs;
        self
    }

    /// Records that the derived configuration may be stale. While the
    /// controller is not active this is all that happens.
    pub async fn mark_dirty(&self) {
        self.state.lock().await.pending = true;
    }

    pub async fn activate(&self) {
        self.state.lock().await.active = true;
    }

    pub async fn deactivate(&self) {
        self.state.lock().await.active = false;
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    pub async fn pending(&self) -> bool {
        self.state.lock().await.pending
    }

    /// The configuration as it would be generated right now; does not
    /// touch the host.
    pub async fn current_configuration(&self) -> ConfigArtifact {
        let addresses = self.tracker.current_addresses().await;
        ConfigArtifact::generate((self.renderer)(&addresses))
    }

    /// Regenerates the artifact and pushes + reloads when its fingerprint
    /// differs from the last applied one. Returns whether anything was
    /// pushed. While inactive, only records a pending update and performs
    /// no remote calls.
    pub async fn reconcile(&self) -> Result<bool, ControllerError> {
        let mut state = self.state.lock().await;
        if !state.active {
            state.pending = true;
            debug!("controller not active, deferring reconciliation");
            return Ok(false);
        }
        state.pending = false;

        let addresses = self.tracker.current_addresses().await;
        let artifact = ConfigArtifact::generate((self.renderer)(&addresses));

        if state.last_fingerprint.as_deref() == Some(artifact.fingerprint.as_str()) {
            debug!("reconfiguration made no change, skipping reload");
            return Ok(false);
        }

        // One-time side installs go first; they never cause a reload on
        // their own.
        for side in &self.side_installs {
            if state.installed.contains(&side.key) {
                continue;
            }
            self.executor
                .copy_to(&side.bytes, &side.remote_path, side.mode.as_deref())
                .await
                .map_err(|source| ControllerError::PushFailed {
                    path: side.remote_path.clone(),
                    source,
                })?;
            state.installed.insert(side.key.clone());
            info!(key = %side.key, "installed one-time side artifact");
        }

        info!(
            targets = addresses.len(),
            fingerprint = %artifact.fingerprint,
            "pushing regenerated configuration"
        );
        self.executor
            .copy_to(artifact.text.as_bytes(), &self.artifact_path, None)
            .await
            .map_err(|source| ControllerError::PushFailed {
                path: self.artifact_path.clone(),
                source,
            })?;

        self.reload
            .reload()
            .await
            .map_err(ControllerError::ReloadFailed)?;

        // Only now is the change considered applied.
        state.last_fingerprint = Some(artifact.fingerprint);
        Ok(true)
    }
}

/// Renderer that expands `{{servers}}` in a template with one line per
/// address, each formatted via the `server_line` template's
/// `{{address}}` placeholder.
pub fn template_renderer(template: String, server_line: String) -> ArtifactRenderer {
    Arc::new(move |addresses: &BTreeSet<String>| {
        let servers = addresses
            .iter()
            .map(|address| server_line.replace("{{address}}", address))
            .collect::<Vec<_>>()
            .join("\n");
        template.replace("{{servers}}", &servers)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{Member, MembershipEvent, StaticGroup};
    use convoy_remote::testing::MockTransport;
    use convoy_remote::HostMutexes;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockReload {
        count: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockReload {
        fn count(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Reloadable for MockReload {
        async fn reload(&self) -> Result<(), DriverError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DriverError::Exec(convoy_remote::ExecError::CommandFailed {
                    exit_code: 1,
                    stderr: "reload failed".to_string(),
                }));
            }
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        group: Arc<StaticGroup>,
        tracker: Arc<MembershipTracker>,
        transport: Arc<MockTransport>,
        reload: Arc<MockReload>,
        engine: ReconciliationEngine,
    }

    async fn fixture(members: Vec<Member>) -> Fixture {
        let group = Arc::new(StaticGroup::new());
        group.set_members(members).await;
        let tracker = Arc::new(MembershipTracker::new(group.clone()));
        tracker.reset().await;

        let transport = Arc::new(MockTransport::new("lb-1"));
        let executor = TaskExecutor::new(transport.clone(), Arc::new(HostMutexes::new()));
        let reload = Arc::new(MockReload::default());
        let engine = ReconciliationEngine::new(
            tracker.clone(),
            executor,
            template_renderer(
                "upstream backend {\n{{servers}}\n}\n".to_string(),
                "  server {{address}};".to_string(),
            ),
            "/srv/lb/conf/server.conf",
            reload.clone(),
        );
        Fixture {
            group,
            tracker,
            transport,
            reload,
            engine,
        }
    }

    fn up_member(id: &str, host: &str) -> Member {
        Member::new(id).up(true).at(host, 8080)
    }

    #[tokio::test]
    async fn test_fingerprint_is_stable_for_same_text() {
        let a = ConfigArtifact::generate("conf".to_string());
        let b = ConfigArtifact::generate("conf".to_string());
        let c = ConfigArtifact::generate("other".to_string());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }

    #[tokio::test]
    async fn test_mark_dirty_sets_pending_without_remote_calls() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        f.engine.mark_dirty().await;
        assert!(f.engine.pending().await);
        assert_eq!(f.transport.copy_count(), 0);
    }

    #[tokio::test]
    async fn test_inactive_reconcile_only_sets_pending() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        let changed = f.engine.reconcile().await.unwrap();
        assert!(!changed);
        assert!(f.engine.pending().await);
        assert_eq!(f.transport.copy_count(), 0);
        assert_eq!(f.reload.count(), 0);
    }

    #[tokio::test]
    async fn test_first_active_reconcile_pushes_and_reloads() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        f.engine.activate().await;
        assert!(f.engine.reconcile().await.unwrap());

        let copies = f.transport.copies();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].remote_path, "/srv/lb/conf/server.conf");
        let text = String::from_utf8(copies[0].bytes.clone()).unwrap();
        assert!(text.contains("server 10.0.0.1:8080;"));
        assert_eq!(f.reload.count(), 1);
        assert!(!f.engine.pending().await);
    }

    #[tokio::test]
    async fn test_unchanged_membership_is_a_noop() {
        // Two passes without a membership change perform exactly one
        // push + reload.
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        f.engine.activate().await;
        assert!(f.engine.reconcile().await.unwrap());
        assert!(!f.engine.reconcile().await.unwrap());
        assert_eq!(f.transport.copy_count(), 1);
        assert_eq!(f.reload.count(), 1);
    }

    #[tokio::test]
    async fn test_membership_change_pushes_again() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        f.engine.activate().await;
        f.engine.reconcile().await.unwrap();

        let b = up_member("b", "10.0.0.2");
        f.group.add(b.clone()).await;
        assert!(f.tracker.on_event(MembershipEvent::Added(b)).await);
        assert!(f.engine.reconcile().await.unwrap());
        assert_eq!(f.transport.copy_count(), 2);
        assert_eq!(f.reload.count(), 2);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_fingerprint_stale() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        f.engine.activate().await;

        f.reload.set_fail(true);
        let err = f.engine.reconcile().await.unwrap_err();
        assert!(matches!(err, ControllerError::ReloadFailed(_)));

        // The next pass retries the same change instead of treating it as
        // applied.
        f.reload.set_fail(false);
        assert!(f.engine.reconcile().await.unwrap());
        assert_eq!(f.reload.count(), 1);
        assert_eq!(f.transport.copy_count(), 2);
    }

    #[tokio::test]
    async fn test_push_failure_is_surfaced() {
        let group = Arc::new(StaticGroup::new());
        group.set_members(vec![up_member("a", "10.0.0.1")]).await;
        let tracker = Arc::new(MembershipTracker::new(group.clone()));
        tracker.reset().await;
        let transport = Arc::new(MockTransport::new("lb-1").fail_transport());
        let executor = TaskExecutor::new(transport, Arc::new(HostMutexes::new()));
        let engine = ReconciliationEngine::new(
            tracker,
            executor,
            template_renderer("{{servers}}".to_string(), "{{address}}".to_string()),
            "/srv/lb/conf/server.conf",
            Arc::new(MockReload::default()),
        );
        engine.activate().await;
        let err = engine.reconcile().await.unwrap_err();
        assert!(matches!(err, ControllerError::PushFailed { .. }));
    }

    #[tokio::test]
    async fn test_side_installs_happen_once() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        let engine = f.engine.with_side_installs(vec![SideInstall {
            key: "global-cert".to_string(),
            bytes: b"PEM".to_vec(),
            remote_path: "/srv/lb/conf/global.crt".to_string(),
            mode: Some("0400".to_string()),
        }]);
        engine.activate().await;
        engine.reconcile().await.unwrap();

        // A later change re-pushes the artifact but not the side install.
        let b = up_member("b", "10.0.0.2");
        f.group.add(b.clone()).await;
        f.tracker.on_event(MembershipEvent::Added(b)).await;
        engine.reconcile().await.unwrap();

        let cert_copies = f
            .transport
            .copies()
            .iter()
            .filter(|c| c.remote_path == "/srv/lb/conf/global.crt")
            .count();
        assert_eq!(cert_copies, 1);
        assert_eq!(f.transport.copy_count(), 3);
    }

    #[tokio::test]
    async fn test_current_configuration_does_not_push() {
        let f = fixture(vec![up_member("a", "10.0.0.1")]).await;
        let artifact = f.engine.current_configuration().await;
        assert!(artifact.text.contains("10.0.0.1:8080"));
        assert_eq!(f.transport.copy_count(), 0);
    }
}
