use atlas_core::{Error, Result};
use atlas_protocol::framing::{read_packet, write_packet};
use atlas_protocol::payload::*;
use atlas_protocol::Payload;
use atlas_queue::Handle;
use log::{error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};

use crate::command::SlaveCommand;
use crate::config::SlaveConfig;

const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const OUTBOUND_CAPACITY: usize = 64;

/// Keeps the slave connected to the master for the whole process lifetime,
/// reconnecting after [`RECONNECT_DELAY`] on any failure. The source has no
/// equivalent — `original_source/slave/main.go` connects once and exits the
/// process on disconnect — but a long-running fleet node that dies whenever
/// the master blips is not a reasonable default, so this is one of the
/// places SPEC_FULL's concurrency model (rather than the source) is
/// authoritative.
pub async fn run(config: SlaveConfig, handle: Handle<SlaveCommand>) {
    loop {
        if let Err(err) = connect_once(&config, handle.clone()).await {
            warn!("master connection failed: {err}");
        }
        let _ = handle.send(SlaveCommand::MasterDisconnected).await;
        sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_once(config: &SlaveConfig, handle: Handle<SlaveCommand>) -> Result<()> {
    info!("connecting to master at {}", config.master_addr);
    let socket = TcpStream::connect(&config.master_addr).await?;
    let (mut reader, mut writer) = tokio::io::split(socket);

    write_packet(
        &mut writer,
        &Payload::Authenticate(Authenticate {
            slave_name: config.name.clone(),
            secret_key: config.secret_key.clone(),
            memory_mib: config.memory_mib,
        }),
    )
    .await?;

    let first = timeout(AUTH_TIMEOUT, read_packet(&mut reader))
        .await
        .map_err(|_| Error::Timeout("master authentication".into()))??;
    match first {
        Payload::AuthSuccess(_) => info!("authenticated with master"),
        Payload::AuthFailed(p) => return Err(Error::Authentication(p.message)),
        other => return Err(Error::Authentication(format!("unexpected reply {}", other.type_name()))),
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Payload>(OUTBOUND_CAPACITY);
    handle
        .send(SlaveCommand::MasterConnected { outbound: outbound_tx })
        .await
        .map_err(|_| Error::Transport("slave command queue closed".into()))?;

    let writer_task = tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if write_packet(&mut writer, &payload).await.is_err() {
                break;
            }
        }
    });

    loop {
        match read_packet(&mut reader).await {
            Ok(payload) => {
                if handle.send(SlaveCommand::HandleMasterPacket(payload)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                error!("lost connection to master: {err}");
                break;
            }
        }
    }

    writer_task.abort();
    Ok(())
}
