use crate::artifact::ArtifactWriter;
use crate::config::{control_socket_path, ArtifactPaths, Profile};
use crate::external::{
    self, ControlServer, FilePreferenceStore, LoopbackBackend, UnixListenerGuard,
};
use crate::manager::{self, Manager};
use anyhow::anyhow;
use std::path::PathBuf;
use std::sync::Arc;

pub const APP_NAME: &str = "VeilConn";

pub struct App {
    manager: Arc<Manager<LoopbackBackend>>,
    control_listener: Arc<UnixListenerGuard>,
}

impl App {
    /// Create a running App instance.
    pub async fn create(config_path: PathBuf, data_path: PathBuf) -> anyhow::Result<Self> {
        // tracing
        external::init_tracing()?;

        // Read stored configuration objects
        let profile_path = config_path.join("profile.yml");
        let profile = Profile::load(&profile_path)
            .map_err(|e| anyhow!("Load profile from {:?} failed: {}", &profile_path, e))?;
        let store = Arc::new(FilePreferenceStore::load(data_path.join("preferences.json"))?);

        let paths = ArtifactPaths::new(&data_path);
        paths.ensure_layout()?;
        external::provision_static_data(&config_path.join("assets"), &paths);

        // Restore the default group and regenerate everything it implies
        let group = manager::init_default_group(&profile, store.as_ref());
        tracing::info!("Default configuration group: {}", group.name);
        let manager = Manager::new(
            LoopbackBackend::default(),
            store,
            ArtifactWriter::new(paths),
            APP_NAME,
        );
        manager.set_default_group(group)?;

        let control_listener = Arc::new(UnixListenerGuard::new(control_socket_path(&data_path))?);
        Ok(Self {
            manager,
            control_listener,
        })
    }

    pub async fn serve_command(self) -> anyhow::Result<()> {
        let server = ControlServer::new(self.manager.clone());
        tokio::select! {
            r = server.run(self.control_listener.clone()) => {
                r.map_err(|e| anyhow!("Control socket failed: {}", e))?;
            }
            _ = tokio::signal::ctrl_c() => {}
        }
        Ok(())
    }
}
