use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use atlas_core::random;
use atlas_protocol::envelope::Envelope;
use atlas_protocol::payload::*;
use atlas_protocol::Payload;
use atlas_queue::Handle;
use log::{info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};

use crate::command::SlaveCommand;
use crate::process;
use crate::template::TemplateSync;
use crate::workspace;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A service whose one-shot key has been handed to a spawned child but
/// whose callback has not arrived yet.
struct PendingCallback {
    name: String,
    port: u16,
}

struct ManagedService {
    stop_tx: Option<oneshot::Sender<()>>,
    stdin_tx: mpsc::Sender<String>,
    control: Option<mpsc::Sender<Payload>>,
    ring: Arc<Mutex<VecDeque<String>>>,
    attached: Arc<AtomicBool>,
}

/// Single consumer of [`SlaveCommand`]. Owns every running child and the
/// one-shot-key handshake table; nothing else on the slave is allowed to
/// touch a `ManagedService` directly. Mirrors the role
/// `atlas-master`'s `Manager` plays for master state.
pub struct ServiceManager {
    state_dir: PathBuf,
    templates: Arc<dyn TemplateSync>,
    callback_addr: String,
    services: HashMap<String, ManagedService>,
    pending: HashMap<String, PendingCallback>,
    outbound: Option<mpsc::Sender<Payload>>,
}

impl ServiceManager {
    pub fn new(state_dir: PathBuf, templates: Arc<dyn TemplateSync>, callback_addr: String) -> Self {
        ServiceManager {
            state_dir,
            templates,
            callback_addr,
            services: HashMap::new(),
            pending: HashMap::new(),
            outbound: None,
        }
    }

    pub async fn run(mut self, mut rx: mpsc::Receiver<SlaveCommand>, handle: Handle<SlaveCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                SlaveCommand::MasterConnected { outbound } => {
                    info!("connected to master");
                    self.outbound = Some(outbound);
                }
                SlaveCommand::MasterDisconnected => {
                    self.outbound = None;
                }
                SlaveCommand::HandleMasterPacket(payload) => {
                    self.handle_master_packet(payload, &handle).await;
                }
                SlaveCommand::ChildConnected { one_shot_key, outbound } => {
                    self.handle_child_connected(one_shot_key, outbound);
                }
                SlaveCommand::ConnectTimeout { name } => {
                    self.handle_connect_timeout(&name);
                }
                SlaveCommand::ServiceLine { name, line } => {
                    let still_attached = self
                        .services
                        .get(&name)
                        .map(|svc| svc.attached.load(Ordering::Relaxed))
                        .unwrap_or(false);
                    if still_attached {
                        self.send(Payload::ScreenLine(ScreenLine { line }));
                    }
                }
                SlaveCommand::ServiceExited { name } => {
                    self.services.remove(&name);
                    self.pending.retain(|_, p| p.name != name);
                    info!("service '{name}' exited");
                    self.send(Payload::ServiceStopped(ServiceStopped { service_name: name }));
                }
                SlaveCommand::Shutdown => {
                    info!("service manager shutting down");
                    break;
                }
            }
        }
    }

    fn send(&self, payload: Payload) {
        if let Some(outbound) = &self.outbound {
            if let Err(err) = outbound.try_send(payload) {
                warn!("failed to queue packet for master: {err}");
            }
        }
    }

    async fn handle_master_packet(&mut self, payload: Payload, handle: &Handle<SlaveCommand>) {
        match payload {
            Payload::ScheduleServiceRequest(p) => self.schedule(p.service, p.group, handle).await,
            Payload::StopService(p) => self.stop_service(&p.service_name),
            Payload::ServiceEnvelope(p) => self.forward_envelope(&p.service_name, &p.inner_payload),
            Payload::AttachScreen(p) => self.set_attached(&p.service_name, true),
            Payload::DetachScreen(p) => self.set_attached(&p.service_name, false),
            Payload::ExecuteServiceCommand(p) => self.write_stdin(&p.service_name, p.command),
            Payload::Shutdown(_) => {
                info!("master requested shutdown");
                let _ = handle.send(SlaveCommand::Shutdown).await;
            }
            other => warn!("unexpected packet from master: {}", other.type_name()),
        }
    }

    /// Sync templates, pick a port, lay out the workspace and spawn the
    /// child, all before the one-shot key is even generated — a failure at
    /// any of those steps reports `ServiceStartFailed` and never touches
    /// `services`/`pending`.
    async fn schedule(&mut self, service: atlas_core::Service, group: atlas_core::Group, handle: &Handle<SlaveCommand>) {
        let name = service.name.clone();
        info!("asked to schedule service '{name}'");

        if let Err(err) = self.templates.sync() {
            self.fail_to_start(&name, format!("failed to sync templates: {err}"));
            return;
        }

        let port = match process::pick_port(group.start_port) {
            Ok(port) => port,
            Err(err) => {
                self.fail_to_start(&name, err.to_string());
                return;
            }
        };

        let one_shot_key = random::hex(32);
        let workspace = match workspace::prepare(
            &self.state_dir,
            self.templates.template_dir(),
            &name,
            &group.name,
            group.kind,
            &one_shot_key,
            &self.callback_addr,
        ) {
            Ok(dir) => dir,
            Err(err) => {
                self.fail_to_start(&name, format!("failed to prepare workspace: {err}"));
                return;
            }
        };

        let spawned = match process::spawn(&workspace, service.memory_mib, name.clone(), port, group.kind, handle.clone()) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.fail_to_start(&name, err.to_string());
                return;
            }
        };

        self.pending.insert(one_shot_key, PendingCallback { name: name.clone(), port });
        self.services.insert(
            name.clone(),
            ManagedService {
                stop_tx: Some(spawned.stop_tx),
                stdin_tx: spawned.stdin_tx,
                control: None,
                ring: spawned.ring,
                attached: spawned.attached,
            },
        );

        let watchdog_handle = handle.clone();
        let watchdog_name = name;
        tokio::spawn(async move {
            sleep(CONNECT_TIMEOUT).await;
            let _ = watchdog_handle.send(SlaveCommand::ConnectTimeout { name: watchdog_name }).await;
        });
    }

    fn fail_to_start(&self, name: &str, message: String) {
        warn!("failed to start service '{name}': {message}");
        self.send(Payload::ServiceStartFailed(ServiceStartFailed {
            service_name: name.to_string(),
            message,
        }));
    }

    fn handle_child_connected(&mut self, one_shot_key: String, outbound: mpsc::Sender<Payload>) {
        let pending = match self.pending.remove(&one_shot_key) {
            Some(pending) => pending,
            None => {
                warn!("received a child callback with an unknown or stale one-shot key");
                return;
            }
        };
        if let Some(svc) = self.services.get_mut(&pending.name) {
            svc.control = Some(outbound);
        }
        info!("service '{}' is online on port {}", pending.name, pending.port);
        self.send(Payload::ServiceOnline(ServiceOnline {
            service_name: pending.name,
            port: pending.port,
        }));
    }

    /// A service that never called back within [`CONNECT_TIMEOUT`] is
    /// stopped and reported as a failed start rather than left running
    /// with no way for the master to ever learn its port.
    fn handle_connect_timeout(&mut self, name: &str) {
        let still_pending = self.pending.values().any(|p| p.name == name);
        if !still_pending {
            return;
        }
        self.pending.retain(|_, p| p.name != name);
        warn!("service '{name}' did not call back within the connect timeout");
        self.stop_service(name);
        self.send(Payload::ServiceStartFailed(ServiceStartFailed {
            service_name: name.to_string(),
            message: "service did not connect back within the timeout".into(),
        }));
    }

    fn stop_service(&mut self, name: &str) {
        if let Some(svc) = self.services.get_mut(name) {
            if let Some(stop_tx) = svc.stop_tx.take() {
                let _ = stop_tx.send(());
            }
        }
    }

    /// Unwrap the bincode-encoded [`Envelope`] tunneled inside a
    /// `ServiceEnvelope` and hand the decoded payload to that service's
    /// control channel — the other end of the one-shot callback connection
    /// kept open by [`crate::callback`].
    fn forward_envelope(&self, service_name: &str, inner_payload: &[u8]) {
        let svc = match self.services.get(service_name) {
            Some(svc) => svc,
            None => {
                warn!("dropping envelope for unknown service '{service_name}'");
                return;
            }
        };
        let control = match &svc.control {
            Some(control) => control,
            None => {
                warn!("dropping envelope for service '{service_name}': no control channel yet");
                return;
            }
        };
        let payload = match decode_envelope(inner_payload) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to decode envelope for service '{service_name}': {err}");
                return;
            }
        };
        if let Err(err) = control.try_send(payload) {
            warn!("failed to forward envelope to service '{service_name}': {err}");
        }
    }

    fn set_attached(&self, name: &str, attached: bool) {
        let svc = match self.services.get(name) {
            Some(svc) => svc,
            None => return,
        };
        svc.attached.store(attached, Ordering::Relaxed);
        if attached {
            let history = svc
                .ring
                .lock()
                .expect("ring buffer mutex poisoned")
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n");
            if !history.is_empty() {
                self.send(Payload::ScreenLine(ScreenLine { line: history }));
            }
        }
    }

    fn write_stdin(&self, name: &str, command: String) {
        if let Some(svc) = self.services.get(name) {
            if svc.stdin_tx.try_send(command).is_err() {
                warn!("failed to deliver console command to service '{name}'");
            }
        }
    }
}

fn decode_envelope(bytes: &[u8]) -> atlas_core::Result<Payload> {
    let envelope: Envelope = bincode::deserialize(bytes)?;
    envelope.unwrap_payload()
}
