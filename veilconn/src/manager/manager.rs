use crate::artifact::ArtifactWriter;
use crate::config::{ConfigError, ConfigurationGroup, Profile};
use crate::external::{
    BackendStatus, PreferenceStore, RegistrationDescriptor, TunnelBackend, TunnelRegistration,
    PREF_DEFAULT_GROUP_ID, PREF_DEFAULT_GROUP_NAME,
};
use crate::manager::ManagerError;
use crate::rules;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use uuid::Uuid;

pub use veilapi::TunnelState;

/// Domain whose traffic triggers on-demand connection establishment.
pub const SERVICE_DOMAIN: &str = "veilconn.app";

/// Reconciles desired connection intent with confirmed reports from the
/// tunnel subsystem. Owns the single authoritative `TunnelState`: it moves
/// only on subsystem confirmations, never on local optimism, so a failed
/// start naturally stays `Off`.
pub struct Manager<B: TunnelBackend> {
    backend: B,
    store: Arc<dyn PreferenceStore>,
    writer: ArtifactWriter,
    display_name: String,
    default_group: ArcSwapOption<ConfigurationGroup>,
    state_tx: watch::Sender<TunnelState>,
    observer_added: AtomicBool,
    // Serializes switch/start/stop; status reports bypass it on purpose.
    op_lock: tokio::sync::Mutex<()>,
}

impl<B: TunnelBackend> Manager<B> {
    pub fn new(
        backend: B,
        store: Arc<dyn PreferenceStore>,
        writer: ArtifactWriter,
        display_name: &str,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TunnelState::Off);
        Arc::new(Self {
            backend,
            store,
            writer,
            display_name: display_name.to_string(),
            default_group: ArcSwapOption::empty(),
            state_tx,
            observer_added: AtomicBool::new(false),
            op_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn state(&self) -> TunnelState {
        *self.state_tx.borrow()
    }

    /// Payload-free change notifications; receivers re-read the state.
    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state_tx.subscribe()
    }

    pub fn default_group(&self) -> Option<Arc<ConfigurationGroup>> {
        self.default_group.load_full()
    }

    /// Makes `group` the process-wide default: regenerates every artifact
    /// and persists the uuid/name pair so the choice survives restarts.
    pub fn set_default_group(&self, group: ConfigurationGroup) -> Result<(), ManagerError> {
        let group = Arc::new(group);
        self.default_group.store(Some(group.clone()));
        self.regenerate_artifacts()?;
        self.store
            .set(PREF_DEFAULT_GROUP_ID, &group.uuid.to_string());
        self.store.set(PREF_DEFAULT_GROUP_NAME, &group.name);
        self.store.synchronize()?;
        Ok(())
    }

    /// Recompiles the default group and rewrites all artifacts together.
    pub fn regenerate_artifacts(&self) -> Result<(), ConfigError> {
        let group = self
            .default_group()
            .ok_or(ConfigError::Internal("no default configuration group"))?;
        let compiled = rules::compile(&group);
        self.writer
            .write_all(&group, &compiled, group.upstream_proxy())
    }

    /// Toggles the tunnel. Returns `Ok(false)` without acting while a
    /// transition is in flight; acting on unconfirmed state could
    /// double-trigger the subsystem.
    pub async fn switch(self: &Arc<Self>) -> Result<bool, ManagerError> {
        let _guard = self.op_lock.lock().await;
        if let Ok(Some(registration)) = self.existing_registration().await {
            self.apply_report(registration.status());
        }
        match self.state() {
            state if state.is_transitioning() => Ok(false),
            TunnelState::Off => {
                self.start_locked().await?;
                Ok(true)
            }
            _ => {
                self.stop_locked().await?;
                Ok(true)
            }
        }
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        let _guard = self.op_lock.lock().await;
        self.start_locked().await
    }

    pub async fn stop(&self) -> Result<(), ManagerError> {
        let _guard = self.op_lock.lock().await;
        self.stop_locked().await
    }

    /// Whether the subsystem currently reports an established tunnel, along
    /// with the registration if one exists.
    pub async fn query(&self) -> (bool, Option<B::Registration>) {
        match self.existing_registration().await {
            Ok(Some(registration)) => (
                registration.status() == BackendStatus::Connected,
                Some(registration),
            ),
            _ => (false, None),
        }
    }

    async fn start_locked(self: &Arc<Self>) -> Result<(), ManagerError> {
        // Artifacts first; a write failure aborts before any subsystem call.
        self.regenerate_artifacts()?;
        let registration = self.load_or_create_registration().await?;
        registration.apply(RegistrationDescriptor {
            enabled: true,
            display_name: self.display_name.clone(),
            on_demand: true,
            on_demand_domains: vec![SERVICE_DOMAIN.to_string()],
        });
        registration
            .save()
            .await
            .map_err(ManagerError::Registration)?;
        registration
            .reload()
            .await
            .map_err(ManagerError::Registration)?;
        if registration.status().is_startable() {
            registration
                .start()
                .await
                .map_err(ManagerError::StartFailure)?;
        }
        // Already connecting/connected counts as success.
        self.attach_status_observer(&registration);
        Ok(())
    }

    async fn stop_locked(&self) -> Result<(), ManagerError> {
        if let Some(registration) = self.existing_registration().await? {
            registration.stop();
        }
        Ok(())
    }

    async fn existing_registration(&self) -> Result<Option<B::Registration>, ManagerError> {
        let mut registrations = self
            .backend
            .load_all()
            .await
            .map_err(ManagerError::Registration)?;
        if registrations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(registrations.remove(0)))
        }
    }

    async fn load_or_create_registration(&self) -> Result<B::Registration, ManagerError> {
        let mut registrations = self
            .backend
            .load_all()
            .await
            .map_err(|_| ManagerError::InvalidProvider)?;
        if registrations.is_empty() {
            Ok(self.backend.create())
        } else {
            Ok(registrations.remove(0))
        }
    }

    /// One observer task ever, however many call sites race here. The
    /// subsystem resolves registrations asynchronously, so this may be
    /// reached concurrently.
    fn attach_status_observer(self: &Arc<Self>, registration: &B::Registration) {
        if self
            .observer_added
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let mut status_rx = registration.subscribe_status();
        self.apply_report(*status_rx.borrow_and_update());
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.apply_report(status);
            }
        });
    }

    /// Maps a confirmed subsystem report onto the observable state, firing
    /// the change notification at most once per actual change.
    fn apply_report(&self, status: BackendStatus) {
        let next = match status {
            BackendStatus::Connected => TunnelState::On,
            BackendStatus::Connecting | BackendStatus::Reasserting => TunnelState::Connecting,
            BackendStatus::Disconnecting => TunnelState::Disconnecting,
            BackendStatus::Disconnected | BackendStatus::Invalid => TunnelState::Off,
        };
        self.state_tx.send_if_modified(|state| {
            if *state != next {
                tracing::info!("Connection state: {} -> {}", state, next);
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

/// Restores the persisted default group, preferring the stored uuid, then
/// the stored name, then the first stored group; a brand-new "Default"
/// group is created when nothing exists yet.
pub fn init_default_group(profile: &Profile, store: &dyn PreferenceStore) -> ConfigurationGroup {
    if let Some(group) = store
        .get(PREF_DEFAULT_GROUP_ID)
        .and_then(|raw| Uuid::parse_str(&raw).ok())
        .and_then(|uuid| profile.group_by_uuid(&uuid))
    {
        return group.clone();
    }
    if let Some(group) = store
        .get(PREF_DEFAULT_GROUP_NAME)
        .and_then(|name| profile.group_by_name(&name))
    {
        return group.clone();
    }
    profile
        .groups()
        .first()
        .cloned()
        .unwrap_or_else(|| ConfigurationGroup::new_default("Default"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactPaths, Proxy, ProxyType, Rule, RuleAction, RuleKind, RuleSet};
    use crate::external::{MemoryPreferenceStore, TunnelError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone)]
    struct MockRegistration {
        slot: Arc<Mutex<Option<MockRegistration>>>,
        descriptor: Arc<Mutex<Option<RegistrationDescriptor>>>,
        status_tx: Arc<watch::Sender<BackendStatus>>,
        start_calls: Arc<AtomicUsize>,
    }

    impl MockRegistration {
        fn report(&self, status: BackendStatus) {
            self.status_tx.send_replace(status);
        }
    }

    #[async_trait]
    impl TunnelRegistration for MockRegistration {
        fn status(&self) -> BackendStatus {
            *self.status_tx.borrow()
        }

        fn apply(&self, descriptor: RegistrationDescriptor) {
            *self.descriptor.lock().unwrap() = Some(descriptor);
        }

        async fn save(&self) -> Result<(), TunnelError> {
            *self.slot.lock().unwrap() = Some(self.clone());
            Ok(())
        }

        async fn reload(&self) -> Result<(), TunnelError> {
            Ok(())
        }

        async fn start(&self) -> Result<(), TunnelError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            // confirmation stays at Connecting until the test says otherwise
            self.report(BackendStatus::Connecting);
            Ok(())
        }

        fn stop(&self) {
            self.report(BackendStatus::Disconnecting);
        }

        fn subscribe_status(&self) -> watch::Receiver<BackendStatus> {
            self.status_tx.subscribe()
        }
    }

    #[derive(Default)]
    struct MockBackend {
        slot: Arc<Mutex<Option<MockRegistration>>>,
        start_calls: Arc<AtomicUsize>,
    }

    impl MockBackend {
        fn with_registration(initial: BackendStatus) -> Self {
            let backend = Self::default();
            let registration = backend.create_with_status(initial);
            *backend.slot.lock().unwrap() = Some(registration);
            backend
        }

        fn create_with_status(&self, status: BackendStatus) -> MockRegistration {
            let (status_tx, _) = watch::channel(status);
            MockRegistration {
                slot: self.slot.clone(),
                descriptor: Arc::new(Mutex::new(None)),
                status_tx: Arc::new(status_tx),
                start_calls: self.start_calls.clone(),
            }
        }

        fn registration(&self) -> MockRegistration {
            self.slot.lock().unwrap().clone().unwrap()
        }
    }

    #[async_trait]
    impl TunnelBackend for MockBackend {
        type Registration = MockRegistration;

        async fn load_all(&self) -> Result<Vec<MockRegistration>, TunnelError> {
            Ok(self.slot.lock().unwrap().iter().cloned().collect())
        }

        fn create(&self) -> MockRegistration {
            self.create_with_status(BackendStatus::Disconnected)
        }
    }

    fn test_group(with_proxy: bool) -> ConfigurationGroup {
        ConfigurationGroup {
            uuid: Uuid::new_v4(),
            name: "test".to_string(),
            dns: None,
            default_to_proxy: with_proxy,
            rule_sets: vec![RuleSet {
                name: "cn".to_string(),
                rules: vec![Rule {
                    kind: RuleKind::GeoIp,
                    action: RuleAction::Proxy,
                    value: "CN".to_string(),
                    pattern: String::new(),
                }],
            }],
            proxies: if with_proxy {
                vec![Proxy {
                    name: "ss".to_string(),
                    proxy_type: ProxyType::Shadowsocks,
                    host: "1.2.3.4".to_string(),
                    port: 8388,
                    password: None,
                    auth_scheme: None,
                    ota: false,
                }]
            } else {
                vec![]
            },
        }
    }

    fn manager_with(
        backend: MockBackend,
        dir: &tempfile::TempDir,
        group: ConfigurationGroup,
    ) -> Arc<Manager<MockBackend>> {
        let writer = ArtifactWriter::new(ArtifactPaths::new(dir.path()));
        let manager = Manager::new(
            backend,
            Arc::new(MemoryPreferenceStore::default()),
            writer,
            "veilconn",
        );
        manager.set_default_group(group).unwrap();
        manager
    }

    #[tokio::test]
    async fn test_double_switch_starts_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let start_calls = backend.start_calls.clone();
        let manager = manager_with(backend, &dir, test_group(true));

        assert!(manager.switch().await.unwrap());
        // first transition still in flight: refused, not queued
        assert!(!manager.switch().await.unwrap());
        assert_eq!(start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(), TunnelState::Connecting);
    }

    #[tokio::test]
    async fn test_start_idempotent_when_connected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_registration(BackendStatus::Connected);
        let start_calls = backend.start_calls.clone();
        let registration = backend.registration();
        let manager = manager_with(backend, &dir, test_group(true));

        manager.start().await.unwrap();
        assert_eq!(start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.state(), TunnelState::On);
        // the descriptor is still refreshed on every start
        let descriptor = registration.descriptor.lock().unwrap().clone().unwrap();
        assert!(descriptor.enabled);
        assert!(descriptor.on_demand);
        assert_eq!(descriptor.on_demand_domains, vec![SERVICE_DOMAIN.to_string()]);
    }

    #[tokio::test]
    async fn test_reasserting_notifies_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_registration(BackendStatus::Connected);
        let registration = backend.registration();
        let manager = manager_with(backend, &dir, test_group(true));
        manager.start().await.unwrap();
        assert_eq!(manager.state(), TunnelState::On);

        let mut state_rx = manager.subscribe();
        state_rx.mark_unchanged();
        registration.report(BackendStatus::Reasserting);
        tokio::time::timeout(Duration::from_secs(1), state_rx.changed())
            .await
            .expect("state change expected")
            .unwrap();
        assert_eq!(*state_rx.borrow_and_update(), TunnelState::Connecting);

        // a second report mapping to the same state fires nothing
        registration.report(BackendStatus::Connecting);
        assert!(
            tokio::time::timeout(Duration::from_millis(100), state_rx.changed())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_artifact_failure_aborts_before_backend() {
        let dir = tempfile::tempdir().unwrap();
        // artifact root is a plain file, so layout creation must fail
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();

        let backend = MockBackend::default();
        let start_calls = backend.start_calls.clone();
        let slot = backend.slot.clone();
        let writer = ArtifactWriter::new(ArtifactPaths::new(&blocked));
        let manager = Manager::new(
            backend,
            Arc::new(MemoryPreferenceStore::default()),
            writer,
            "veilconn",
        );
        manager.default_group.store(Some(Arc::new(test_group(true))));

        assert!(matches!(
            manager.start().await,
            Err(ManagerError::Config(_))
        ));
        assert_eq!(start_calls.load(Ordering::SeqCst), 0);
        assert!(slot.lock().unwrap().is_none());
        assert_eq!(manager.state(), TunnelState::Off);
    }

    #[tokio::test]
    async fn test_stop_without_registration_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(MockBackend::default(), &dir, test_group(false));
        manager.stop().await.unwrap();
        assert_eq!(manager.state(), TunnelState::Off);
    }

    #[tokio::test]
    async fn test_switch_without_proxies_is_direct_only() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::default();
        let manager = manager_with(backend, &dir, test_group(false));

        assert!(manager.switch().await.unwrap());
        assert_eq!(manager.state(), TunnelState::Connecting);
        assert!(!ArtifactPaths::new(dir.path()).shadowsocks_conf().exists());
    }

    #[tokio::test]
    async fn test_observer_attached_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_registration(BackendStatus::Connected);
        let registration = backend.registration();
        let manager = manager_with(backend, &dir, test_group(true));

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        // one observer task, not one per start
        assert_eq!(registration.status_tx.receiver_count(), 1);
    }

    #[tokio::test]
    async fn test_query_reflects_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = MockBackend::with_registration(BackendStatus::Connected);
        let manager = manager_with(backend, &dir, test_group(true));
        let (running, registration) = manager.query().await;
        assert!(running);
        assert!(registration.is_some());

        let dir2 = tempfile::tempdir().unwrap();
        let manager2 = manager_with(MockBackend::default(), &dir2, test_group(true));
        let (running2, registration2) = manager2.query().await;
        assert!(!running2);
        assert!(registration2.is_none());
    }

    #[test]
    fn test_init_default_group_precedence() {
        let raw: crate::config::RawProfile = serde_yaml::from_str(
            "
groups:
  - name: First
  - name: Second
    uuid: 6b4911a9-6328-4d34-9a05-6171bb244f61
",
        )
        .unwrap();
        let profile = Profile::from_raw(raw).unwrap();
        let store = MemoryPreferenceStore::default();

        // nothing persisted: first group wins
        assert_eq!(init_default_group(&profile, &store).name, "First");

        store.set(PREF_DEFAULT_GROUP_NAME, "Second");
        assert_eq!(init_default_group(&profile, &store).name, "Second");

        // uuid takes precedence over name
        let first_uuid = profile.group_by_name("First").unwrap().uuid;
        store.set(PREF_DEFAULT_GROUP_ID, &first_uuid.to_string());
        assert_eq!(init_default_group(&profile, &store).name, "First");

        // empty profile: a fresh default group is created
        let empty = Profile::from_raw(serde_yaml::from_str("{}").unwrap()).unwrap();
        let fresh = init_default_group(&empty, &MemoryPreferenceStore::default());
        assert_eq!(fresh.name, "Default");
        assert!(fresh.proxies.is_empty());
    }
}
