use std::net::SocketAddr;
use std::sync::Arc;

use atlas_core::{Error, Result};
use atlas_protocol::framing::{read_packet, write_packet};
use atlas_protocol::payload::*;
use atlas_protocol::Payload;
use atlas_queue::Handle;
use log::{info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::command::MasterCommand;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const OUTBOUND_CAPACITY: usize = 64;

/// Accept loop for the slave-facing listener. One task per connection; the
/// connection's own lifetime is entirely handled in [`handle_connection`].
pub async fn serve(bind_addr: &str, secret_key: Arc<String>, handle: Handle<MasterCommand>) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("listening for slaves on {bind_addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        let handle = handle.clone();
        let secret_key = secret_key.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, peer, secret_key, handle).await {
                warn!("slave connection from {peer} ended: {err}");
            }
        });
    }
}

/// Pre-auth handshake followed by the per-connection reader/writer split.
/// Every packet a slave sends after authentication becomes a
/// [`MasterCommand::HandleSlavePacket`]; everything addressed to the slave
/// flows through its dedicated outbound channel into the writer task.
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    secret_key: Arc<String>,
    handle: Handle<MasterCommand>,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(socket);

    let first = timeout(AUTH_TIMEOUT, read_packet(&mut reader))
        .await
        .map_err(|_| Error::Timeout("slave authentication".into()))??;

    let auth = match first {
        Payload::Authenticate(a) => a,
        other => {
            return Err(Error::Authentication(format!(
                "expected Authenticate, got {}",
                other.type_name()
            )));
        }
    };

    if auth.secret_key != *secret_key {
        write_packet(
            &mut writer,
            &Payload::AuthFailed(AuthFailed { message: "bad secret key".into() }),
        )
        .await?;
        return Err(Error::Authentication(format!(
            "slave '{}' sent a bad secret key",
            auth.slave_name
        )));
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Payload>(OUTBOUND_CAPACITY);
    let register = handle
        .call(|reply| MasterCommand::SlaveConnected {
            name: auth.slave_name.clone(),
            remote_host: peer.ip().to_string(),
            memory_mib: auth.memory_mib,
            outbound: outbound_tx,
            reply,
        })
        .await
        .map_err(|_| Error::Transport("master command queue closed".into()))?;

    if let Err(message) = register {
        write_packet(&mut writer, &Payload::AuthFailed(AuthFailed { message: message.clone() })).await?;
        return Err(Error::Authentication(message));
    }

    write_packet(&mut writer, &Payload::AuthSuccess(AuthSuccess {})).await?;
    info!("slave '{}' connected from {peer}", auth.slave_name);

    let writer_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if write_packet(&mut writer, &payload).await.is_err() {
                break;
            }
        }
    });

    let slave_name = auth.slave_name.clone();
    loop {
        match read_packet(&mut reader).await {
            Ok(payload) => {
                let sent = handle
                    .send(MasterCommand::HandleSlavePacket {
                        slave_name: slave_name.clone(),
                        payload,
                    })
                    .await;
                if sent.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }

    writer_task.abort();
    let _ = handle.send(MasterCommand::SlaveDisconnected { name: slave_name }).await;
    Ok(())
}
