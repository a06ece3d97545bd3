use crate::external::TunnelBackend;
use crate::manager::Manager;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use veilapi::{ControlRequest, ControlResponse};

pub struct UnixListenerGuard {
    path: PathBuf,
    listener: Option<UnixListener>,
}

impl UnixListenerGuard {
    pub fn new<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.try_exists()? {
            // A previous instance that died uncleanly leaves its socket behind.
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        Ok(Self {
            path,
            listener: Some(listener),
        })
    }

    pub fn get_listener(&self) -> &UnixListener {
        self.listener.as_ref().unwrap()
    }
}

impl Drop for UnixListenerGuard {
    fn drop(&mut self) {
        self.listener = None;
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::error!("Error when removing unix domain socket: {}", e)
        }
    }
}

/// Serves switch/status requests from other processes over a unix domain
/// socket, one JSON object per line. This is the deep-link equivalent: any
/// external caller can request a switch without joining this process.
pub struct ControlServer<B: TunnelBackend> {
    manager: Arc<Manager<B>>,
}

impl<B: TunnelBackend> ControlServer<B> {
    pub fn new(manager: Arc<Manager<B>>) -> Self {
        Self { manager }
    }

    pub async fn run(self, listener: Arc<UnixListenerGuard>) -> io::Result<()> {
        loop {
            let (conn, _addr) = listener.get_listener().accept().await?;
            let manager = self.manager.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_connection(conn, manager).await {
                    tracing::debug!("Control connection closed: {}", e);
                }
            });
        }
    }
}

async fn serve_connection<B: TunnelBackend>(
    conn: UnixStream,
    manager: Arc<Manager<B>>,
) -> io::Result<()> {
    let (read_half, mut write_half) = conn.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(ControlRequest::Switch) => match manager.switch().await {
                Ok(acted) => ControlResponse::Ok {
                    state: manager.state(),
                    acted,
                },
                Err(e) => ControlResponse::Error {
                    message: e.to_string(),
                },
            },
            Ok(ControlRequest::Status) => ControlResponse::Ok {
                state: manager.state(),
                acted: false,
            },
            Err(e) => ControlResponse::Error {
                message: format!("bad request: {}", e),
            },
        };
        let mut serialized = serde_json::to_string(&response).unwrap_or_default();
        serialized.push('\n');
        write_half.write_all(serialized.as_bytes()).await?;
    }
    Ok(())
}
