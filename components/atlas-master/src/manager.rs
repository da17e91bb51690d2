use std::path::PathBuf;

use atlas_protocol::payload::*;
use atlas_protocol::Payload;
use log::{info, warn};
use tokio::sync::mpsc;

use crate::command::MasterCommand;
use crate::config::MasterConfig;
use crate::group_store::{FsTemplateProvisioner, GroupStore};
use crate::scheduler::{Scheduler, SchedulerAction};
use crate::slave_registry::SlaveRegistry;

pub struct Manager {
    config: MasterConfig,
    groups: GroupStore,
    slaves: SlaveRegistry,
    scheduler: Scheduler,
    templates: FsTemplateProvisioner,
    /// Name of the service the REPL is currently attached to, if any. At
    /// most one target per master process, following the source's
    /// single-field `screen` tracker.
    screen_target: Option<String>,
}

impl Manager {
    pub fn new(config: MasterConfig, state_dir: PathBuf) -> atlas_core::Result<Manager> {
        let groups_dir = state_dir.join("groups");
        let templates_dir = state_dir.join("templates");
        std::fs::create_dir_all(&templates_dir)?;
        Ok(Manager {
            config,
            groups: GroupStore::load(groups_dir)?,
            slaves: SlaveRegistry::new(),
            scheduler: Scheduler::new(),
            templates: FsTemplateProvisioner { templates_root: templates_dir },
            screen_target: None,
        })
    }

    pub fn secret_key(&self) -> &str {
        &self.config.secret_key
    }

    fn execute(&self, actions: Vec<SchedulerAction>) {
        for action in actions {
            match action {
                SchedulerAction::Send { slave_name, payload } => {
                    self.slaves.send_to(&slave_name, payload);
                }
            }
        }
    }

    /// The single consumer of the master's command queue. All state
    /// mutation in the process happens inside this loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<MasterCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                MasterCommand::SlaveConnected { name, remote_host, memory_mib, outbound, reply } => {
                    let result = self
                        .slaves
                        .register(name.clone(), remote_host, memory_mib, outbound)
                        .map_err(|e| e.to_string());
                    if result.is_ok() {
                        info!("slave '{name}' authenticated with {memory_mib} MiB free");
                    }
                    let _ = reply.send(result);
                }
                MasterCommand::SlaveDisconnected { name } => {
                    if self.slaves.remove(&name).is_some() {
                        warn!("slave '{name}' disconnected");
                        self.scheduler.handle_slave_disconnected(&name);
                        if self.screen_target.as_deref().map(|t| {
                            self.scheduler.service(t).and_then(|s| s.slave_name.as_deref()) == Some(name.as_str())
                        }).unwrap_or(false) {
                            self.screen_target = None;
                        }
                    }
                }
                MasterCommand::HandleSlavePacket { slave_name, payload } => {
                    self.handle_slave_packet(&slave_name, payload);
                }
                MasterCommand::ScheduleServices => {
                    let actions = self.scheduler.reconcile(self.groups.groups(), &mut self.slaves);
                    self.execute(actions);
                }
                MasterCommand::GroupCreate { group, reply } => {
                    let result = self.groups.create(group, &self.templates).map_err(|e| e.to_string());
                    let _ = reply.send(result);
                }
                MasterCommand::GroupList { reply } => {
                    let _ = reply.send(self.groups.groups().to_vec());
                }
                MasterCommand::GroupReload { reply } => {
                    let result = self.groups.reload(&self.templates);
                    match result {
                        Ok(diff) => {
                            for removed in &diff.removed {
                                match self.scheduler.remove_group_services(&removed.name) {
                                    Ok(actions) => self.execute(actions),
                                    Err(err) => warn!("failed to stop services for removed group '{}': {err}", removed.name),
                                }
                            }
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err.to_string()));
                        }
                    }
                }
                MasterCommand::GroupRestart { name, reply } => {
                    if self.groups.get(&name).is_none() {
                        let _ = reply.send(Err(format!("unknown group '{name}'")));
                        continue;
                    }
                    let result = self.scheduler.restart_group(&name).map_err(|e| e.to_string());
                    match result {
                        Ok(actions) => {
                            self.execute(actions);
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        }
                    }
                }
                MasterCommand::ServiceList { reply } => {
                    let _ = reply.send(self.scheduler.services().to_vec());
                }
                MasterCommand::ServiceStop { name, reply } => {
                    let result = self.scheduler.stop_service(&name).map_err(|e| e.to_string());
                    match result {
                        Ok(actions) => {
                            self.execute(actions);
                            let _ = reply.send(Ok(()));
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        }
                    }
                }
                MasterCommand::ScreenAttach { name, reply } => {
                    let result = self.attach_screen(name);
                    let _ = reply.send(result);
                }
                MasterCommand::ScreenDetach { reply } => {
                    let result = self.detach_screen();
                    let _ = reply.send(result);
                }
                MasterCommand::ScreenExecute { command, reply } => {
                    let result = self.execute_on_attached(command);
                    let _ = reply.send(result);
                }
                MasterCommand::Shutdown => {
                    info!("master shutting down");
                    self.slaves.broadcast(|| Payload::Shutdown(Shutdown {}));
                    break;
                }
            }
        }
    }

    fn attach_screen(&mut self, name: String) -> Result<(), String> {
        let svc = self.scheduler.service(&name).ok_or_else(|| format!("unknown service '{name}'"))?;
        let slave_name = svc.slave_name.clone().ok_or_else(|| "service not connected".to_string())?;
        if self.screen_target.is_some() {
            self.detach_screen()?;
        }
        self.slaves.send_to(&slave_name, Payload::AttachScreen(AttachScreen { service_name: name.clone() }));
        self.screen_target = Some(name.clone());
        info!("attached to service '{name}'");
        Ok(())
    }

    fn detach_screen(&mut self) -> Result<(), String> {
        let name = match self.screen_target.take() {
            Some(n) => n,
            None => return Ok(()),
        };
        if let Some(svc) = self.scheduler.service(&name) {
            if let Some(slave_name) = &svc.slave_name {
                self.slaves.send_to(slave_name, Payload::DetachScreen(DetachScreen { service_name: name.clone() }));
            }
        }
        info!("detached from service '{name}'");
        Ok(())
    }

    fn execute_on_attached(&mut self, command: String) -> Result<(), String> {
        let name = self.screen_target.clone().ok_or_else(|| "no service attached".to_string())?;
        let svc = self.scheduler.service(&name).ok_or_else(|| format!("unknown service '{name}'"))?;
        let slave_name = svc.slave_name.clone().ok_or_else(|| "service not connected".to_string())?;
        self.slaves.send_to(
            &slave_name,
            Payload::ExecuteServiceCommand(ExecuteServiceCommand { service_name: name, command }),
        );
        Ok(())
    }

    fn handle_slave_packet(&mut self, slave_name: &str, payload: Payload) {
        match payload {
            Payload::ServiceStartFailed(p) => {
                if let Err(err) = self.scheduler.handle_service_start_failed(&p.service_name, &mut self.slaves) {
                    warn!("failed to process ServiceStartFailed for '{}': {err}", p.service_name);
                }
                warn!("service '{}' failed to start on slave '{slave_name}': {}", p.service_name, p.message);
            }
            Payload::ServiceOnline(p) => {
                match self.scheduler.handle_service_online(&p.service_name, p.port, &self.slaves) {
                    Ok(actions) => self.execute(actions),
                    Err(err) => warn!("failed to process ServiceOnline for '{}': {err}", p.service_name),
                }
            }
            Payload::ServiceStopped(p) => {
                match self.scheduler.handle_service_stopped(&p.service_name, &mut self.slaves) {
                    Ok(actions) => self.execute(actions),
                    Err(err) => warn!("failed to process ServiceStopped for '{}': {err}", p.service_name),
                }
            }
            Payload::ScreenLine(p) => {
                if self.screen_target.as_ref().map(|t| {
                    self.scheduler.service(t).map(|s| s.slave_name.as_deref() == Some(slave_name)).unwrap_or(false)
                }).unwrap_or(false) {
                    println!("{}", p.line);
                }
            }
            other => {
                warn!("unexpected packet from slave '{slave_name}': {}", other_type_name(&other));
            }
        }
    }
}

fn other_type_name(payload: &Payload) -> &'static str {
    payload.type_name()
}
