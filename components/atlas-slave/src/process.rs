use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use atlas_core::{Error, GroupType, Result};
use atlas_queue::Handle;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};

use crate::command::SlaveCommand;

pub const RING_BUFFER_LINES: usize = 100;
const STOP_GRACE: Duration = Duration::from_secs(20);

/// Handles left behind by [`spawn`], retained by the service manager for
/// the lifetime of one running child.
pub struct SpawnedChild {
    pub stop_tx: oneshot::Sender<()>,
    pub stdin_tx: mpsc::Sender<String>,
    pub ring: Arc<Mutex<VecDeque<String>>>,
    pub attached: Arc<AtomicBool>,
}

/// Find the lowest free port at or above `start` by binding and immediately
/// dropping a probe listener. A later connect-before-we-bind race is
/// possible but rare enough to accept for this placement step.
pub fn pick_port(start: u16) -> Result<u16> {
    for candidate in start..=u16::MAX {
        if let Ok(listener) = std::net::TcpListener::bind(("0.0.0.0", candidate)) {
            return Ok(listener.local_addr().map(|addr| addr.port()).unwrap_or(candidate));
        }
    }
    Err(Error::Capacity("no free port available on this host".into()))
}

/// Extra arguments appended after `--port <port>`, varying by what kind of
/// child is being launched.
fn type_specific_args(kind: GroupType) -> &'static [&'static str] {
    match kind {
        GroupType::Proxy => &[],
        GroupType::Server => &["nogui"],
    }
}

/// Launch one child process. Mirrors
/// `original_source/slave/service.go`'s `startService`, generalised from a
/// hardcoded `java -jar server.jar` to the full `[jvm_memory_flag, -jar
/// server.jar, --port <port>, ...type-specific extras]` argument list.
pub fn spawn(
    workspace: &Path,
    memory_mib: u32,
    name: String,
    port: u16,
    kind: GroupType,
    handle: Handle<SlaveCommand>,
) -> Result<SpawnedChild> {
    let mut command = Command::new("java");
    command
        .arg(format!("-Xmx{memory_mib}M"))
        .arg("-jar")
        .arg("server.jar")
        .arg("--port")
        .arg(port.to_string())
        .args(type_specific_args(kind))
        .current_dir(workspace)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|err| Error::Process(format!("failed to start service: {err}")))?;

    let stdin = child.stdin.take().expect("stdin is piped");
    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");

    let ring = Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_LINES)));
    let attached = Arc::new(AtomicBool::new(false));

    spawn_line_pump(stdout, name.clone(), ring.clone(), attached.clone(), handle.clone());
    spawn_line_pump(stderr, name.clone(), ring.clone(), attached.clone(), handle.clone());

    let (stdin_tx, stdin_rx) = mpsc::channel::<String>(32);
    spawn_stdin_writer(stdin, stdin_rx);

    let (stop_tx, stop_rx) = oneshot::channel();
    let pid = child.id().unwrap_or(0);
    tokio::spawn(supervise(child, pid, name, stop_rx, handle));

    Ok(SpawnedChild { stop_tx, stdin_tx, ring, attached })
}

fn spawn_line_pump<R>(stream: R, name: String, ring: Arc<Mutex<VecDeque<String>>>, attached: Arc<AtomicBool>, handle: Handle<SlaveCommand>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    {
                        let mut ring = ring.lock().expect("ring buffer mutex poisoned");
                        if ring.len() == RING_BUFFER_LINES {
                            ring.pop_front();
                        }
                        ring.push_back(line.clone());
                    }
                    if attached.load(Ordering::Relaxed)
                        && handle.send(SlaveCommand::ServiceLine { name: name.clone(), line }).await.is_err()
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!("failed to read output for service '{name}': {err}");
                    break;
                }
            }
        }
    });
}

fn spawn_stdin_writer(mut stdin: tokio::process::ChildStdin, mut rx: mpsc::Receiver<String>) {
    tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if stdin.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdin.write_all(b"\n").await.is_err() {
                break;
            }
        }
    });
}

/// Owns the child for its whole lifetime: reaps it normally, or on a stop
/// request sends `SIGTERM` and escalates to `SIGKILL` if it hasn't exited
/// within the grace period.
async fn supervise(mut child: Child, pid: u32, name: String, mut stop_rx: oneshot::Receiver<()>, handle: Handle<SlaveCommand>) {
    tokio::select! {
        status = child.wait() => {
            log_exit(&name, status);
        }
        _ = &mut stop_rx => {
            if let Err(err) = send_sigterm(pid) {
                warn!("failed to send SIGTERM to service '{name}' (pid {pid}): {err}");
            }
            tokio::select! {
                status = child.wait() => log_exit(&name, status),
                _ = sleep(STOP_GRACE) => {
                    warn!("service '{name}' did not stop within the grace period, killing");
                    let _ = child.kill().await;
                    let status = child.wait().await;
                    log_exit(&name, status);
                }
            }
        }
    }
    let _ = handle.send(SlaveCommand::ServiceExited { name }).await;
}

fn log_exit(name: &str, status: std::io::Result<std::process::ExitStatus>) {
    match status {
        Ok(status) => info!("service '{name}' exited with {status}"),
        Err(err) => warn!("failed to wait on service '{name}': {err}"),
    }
}

fn send_sigterm(pid: u32) -> std::io::Result<()> {
    if pid == 0 {
        return Ok(());
    }
    // SAFETY: `kill` with an already-owned pid and a well-known signal
    // number is a plain syscall with no aliasing concerns.
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret != 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_port_returns_a_port_at_or_above_the_floor() {
        let port = pick_port(20000).unwrap();
        assert!(port >= 20000);
    }
}
