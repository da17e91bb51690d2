use std::net::SocketAddr;

use atlas_core::{Error, Result};
use atlas_protocol::framing::{read_packet, write_packet};
use atlas_protocol::Payload;
use atlas_queue::Handle;
use log::warn;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::command::SlaveCommand;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROL_CAPACITY: usize = 16;

/// Accept loop for child processes calling back with their one-shot key.
/// A successful handshake keeps the connection open as that service's
/// control channel (for `ServiceEnvelope` tunnels); the socket is otherwise
/// closed immediately.
pub async fn serve(bind_addr: &str, handle: Handle<SlaveCommand>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    log::info!("listening for service callbacks on {bind_addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_callback(socket, peer, handle).await {
                warn!("service callback connection from {peer} ended: {err}");
            }
        });
    }
}

async fn handle_callback(socket: TcpStream, peer: SocketAddr, handle: Handle<SlaveCommand>) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(socket);

    let first = timeout(HANDSHAKE_TIMEOUT, read_packet(&mut reader))
        .await
        .map_err(|_| Error::Timeout("service callback handshake".into()))??;

    let one_shot_key = match first {
        Payload::ServiceConnect(p) => p.one_shot_key,
        other => {
            return Err(Error::Validation(format!(
                "expected ServiceConnect, got {}",
                other.type_name()
            )));
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Payload>(CONTROL_CAPACITY);
    let writer_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if write_packet(&mut writer, &payload).await.is_err() {
                break;
            }
        }
    });

    if handle
        .send(SlaveCommand::ChildConnected { one_shot_key, outbound: outbound_tx })
        .await
        .is_err()
    {
        writer_task.abort();
        return Ok(());
    }

    loop {
        match read_packet(&mut reader).await {
            Ok(payload) => warn!("unexpected packet from child at {peer}: {}", payload.type_name()),
            Err(_) => break,
        }
    }
    writer_task.abort();
    Ok(())
}
