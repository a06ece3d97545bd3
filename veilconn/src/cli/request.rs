use crate::config::{control_socket_path, parse_paths};
use anyhow::anyhow;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use veilapi::{ControlRequest, ControlResponse};

pub(super) async fn send_switch(app_data: &Option<PathBuf>) -> anyhow::Result<()> {
    match roundtrip(app_data, ControlRequest::Switch).await? {
        ControlResponse::Ok { state, acted: true } => {
            println!("Switched; connection state: {}", state);
            Ok(())
        }
        ControlResponse::Ok {
            state,
            acted: false,
        } => {
            println!("Transition in flight ({}); try again later", state);
            Ok(())
        }
        ControlResponse::Error { message } => Err(anyhow!("Switch failed: {}", message)),
    }
}

pub(super) async fn send_status(app_data: &Option<PathBuf>) -> anyhow::Result<()> {
    match roundtrip(app_data, ControlRequest::Status).await? {
        ControlResponse::Ok { state, .. } => {
            println!("{}", state);
            Ok(())
        }
        ControlResponse::Error { message } => Err(anyhow!("Status failed: {}", message)),
    }
}

async fn roundtrip(
    app_data: &Option<PathBuf>,
    request: ControlRequest,
) -> anyhow::Result<ControlResponse> {
    let (_, data_path) = parse_paths(&None, app_data)?;
    let socket = control_socket_path(&data_path);
    let stream = UnixStream::connect(&socket).await.map_err(|e| {
        anyhow!(
            "Cannot reach daemon at {} ({}); is `veilconn start` running?",
            socket.to_string_lossy(),
            e
        )
    })?;
    let (read_half, mut write_half) = stream.into_split();
    let mut serialized = serde_json::to_string(&request)?;
    serialized.push('\n');
    write_half.write_all(serialized.as_bytes()).await?;

    let mut lines = BufReader::new(read_half).lines();
    let line = lines
        .next_line()
        .await?
        .ok_or_else(|| anyhow!("Daemon closed the connection"))?;
    Ok(serde_json::from_str(&line)?)
}
