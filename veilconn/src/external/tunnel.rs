use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::watch;

/// Raw status reported by the tunnel subsystem for a registration's
/// connection. The controller maps these onto the externally observable
/// `TunnelState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStatus {
    Invalid,
    Disconnected,
    Connecting,
    Connected,
    Reasserting,
    Disconnecting,
}

impl BackendStatus {
    /// The start primitive may only be issued from these statuses.
    pub fn is_startable(&self) -> bool {
        matches!(self, BackendStatus::Disconnected | BackendStatus::Invalid)
    }
}

/// What the controller persists into the subsystem's preference store for a
/// registration. Refreshed in full on every start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationDescriptor {
    pub enabled: bool,
    pub display_name: String,
    pub on_demand: bool,
    /// Traffic to these domains triggers connect-if-needed.
    pub on_demand_domains: Vec<String>,
}

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Registration load failed: {0}")]
    Load(String),
    #[error("Registration save failed: {0}")]
    Save(String),
    #[error("Tunnel start rejected: {0}")]
    Start(String),
}

/// The subsystem's persisted descriptor of one tunnel provider instance.
#[async_trait]
pub trait TunnelRegistration: Clone + Send + Sync + 'static {
    fn status(&self) -> BackendStatus;
    fn apply(&self, descriptor: RegistrationDescriptor);
    async fn save(&self) -> Result<(), TunnelError>;
    async fn reload(&self) -> Result<(), TunnelError>;
    async fn start(&self) -> Result<(), TunnelError>;
    fn stop(&self);
    /// Status-change notifications scoped to this registration's connection.
    fn subscribe_status(&self) -> watch::Receiver<BackendStatus>;
}

/// The operating-system tunnel subsystem. Only the lifecycle surface is
/// modeled; the data path is out of scope.
#[async_trait]
pub trait TunnelBackend: Send + Sync + 'static {
    type Registration: TunnelRegistration;

    /// All registrations currently persisted for this app.
    async fn load_all(&self) -> Result<Vec<Self::Registration>, TunnelError>;
    /// A fresh, not-yet-persisted registration. It becomes visible to
    /// `load_all` only after its first `save`.
    fn create(&self) -> Self::Registration;
}

/// In-process stand-in for the OS subsystem, used by the standalone binary.
/// Start/stop flip the reported status through the same confirmation
/// sequence a real provider would; no packets are moved.
#[derive(Default)]
pub struct LoopbackBackend {
    slot: Arc<Mutex<Option<LoopbackRegistration>>>,
}

#[async_trait]
impl TunnelBackend for LoopbackBackend {
    type Registration = LoopbackRegistration;

    async fn load_all(&self) -> Result<Vec<LoopbackRegistration>, TunnelError> {
        Ok(self.slot.lock().unwrap().iter().cloned().collect())
    }

    fn create(&self) -> LoopbackRegistration {
        LoopbackRegistration::new(self.slot.clone())
    }
}

#[derive(Clone)]
pub struct LoopbackRegistration {
    slot: Arc<Mutex<Option<LoopbackRegistration>>>,
    descriptor: Arc<Mutex<Option<RegistrationDescriptor>>>,
    status_tx: Arc<watch::Sender<BackendStatus>>,
}

impl LoopbackRegistration {
    fn new(slot: Arc<Mutex<Option<LoopbackRegistration>>>) -> Self {
        let (status_tx, _) = watch::channel(BackendStatus::Invalid);
        Self {
            slot,
            descriptor: Arc::new(Mutex::new(None)),
            status_tx: Arc::new(status_tx),
        }
    }

    fn report(&self, status: BackendStatus) {
        self.status_tx.send_replace(status);
    }
}

#[async_trait]
impl TunnelRegistration for LoopbackRegistration {
    fn status(&self) -> BackendStatus {
        *self.status_tx.borrow()
    }

    fn apply(&self, descriptor: RegistrationDescriptor) {
        *self.descriptor.lock().unwrap() = Some(descriptor);
    }

    async fn save(&self) -> Result<(), TunnelError> {
        if self.descriptor.lock().unwrap().is_none() {
            return Err(TunnelError::Save("no descriptor applied".to_string()));
        }
        *self.slot.lock().unwrap() = Some(self.clone());
        if self.status() == BackendStatus::Invalid {
            self.report(BackendStatus::Disconnected);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), TunnelError> {
        if self.slot.lock().unwrap().is_none() {
            return Err(TunnelError::Load("registration not persisted".to_string()));
        }
        Ok(())
    }

    async fn start(&self) -> Result<(), TunnelError> {
        if !self.status().is_startable() {
            // Matches the subsystem contract: start is only legal when down.
            return Err(TunnelError::Start(format!(
                "not startable from {:?}",
                self.status()
            )));
        }
        self.report(BackendStatus::Connecting);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            this.report(BackendStatus::Connected);
        });
        Ok(())
    }

    fn stop(&self) {
        if matches!(
            self.status(),
            BackendStatus::Connected | BackendStatus::Connecting | BackendStatus::Reasserting
        ) {
            self.report(BackendStatus::Disconnecting);
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                this.report(BackendStatus::Disconnected);
            });
        }
    }

    fn subscribe_status(&self) -> watch::Receiver<BackendStatus> {
        self.status_tx.subscribe()
    }
}
