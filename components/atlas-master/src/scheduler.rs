use std::collections::HashSet;

use atlas_core::{Error, Group, GroupType, Result, Service, ServiceState};
use atlas_protocol::envelope::Envelope;
use atlas_protocol::payload::*;
use log::{info, warn};

use crate::slave_registry::SlaveRegistry;

/// An effect the scheduler decided on but cannot carry out itself (it does
/// not own any sockets) — the manager executes these against the slave
/// registry's outbound channels.
#[derive(Debug, Clone)]
pub enum SchedulerAction {
    Send { slave_name: String, payload: Payload },
}

fn wrap_for_child(service_name: &str, payload: Payload) -> Result<Payload> {
    let envelope = Envelope::wrap(&payload)?;
    let inner_payload = bincode::serialize(&envelope)?;
    Ok(Payload::ServiceEnvelope(ServiceEnvelope {
        service_name: service_name.to_string(),
        inner_payload,
    }))
}

/// The central placement and reconciliation algorithm. Owns the live
/// `Service` list; groups and slaves are borrowed in from their own stores
/// for the duration of each call.
#[derive(Default)]
pub struct Scheduler {
    services: Vec<Service>,
    /// Names already logged once as demoted to `Waiting`, so repeated ticks
    /// with no capacity don't spam the log.
    logged_waiting: HashSet<String>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    fn next_name(&self, group_name: &str) -> String {
        for n in 1.. {
            let candidate = format!("{group_name}-{n:02}");
            if self.services.iter().all(|s| s.name != candidate) {
                return candidate;
            }
        }
        unreachable!("positive integers are unbounded")
    }

    fn create_service(&mut self, group: &Group) {
        let name = self.next_name(&group.name);
        info!("service '{name}' created");
        self.services.push(Service::new_pending(
            name,
            group.kind,
            group.name.clone(),
            group.memory_mib,
        ));
    }

    /// One reconciliation tick: remove last tick's `Offline` services,
    /// reconcile desired counts against `groups`, evict surplus, then place
    /// every unplaced service against `slaves`.
    pub fn reconcile(&mut self, groups: &[Group], slaves: &mut SlaveRegistry) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();

        self.services.retain(|s| s.state != ServiceState::Offline);

        for group in groups {
            let count = self
                .services
                .iter()
                .filter(|s| s.group_name == group.name)
                .count();

            if count < group.min_services as usize {
                for _ in 0..(group.min_services as usize - count) {
                    self.create_service(group);
                }
            } else if count > group.max_services as usize {
                let excess = count - group.max_services as usize;
                let mut candidates: Vec<String> = self
                    .services
                    .iter()
                    .filter(|s| s.group_name == group.name && s.state != ServiceState::Stopping)
                    .map(|s| s.name.clone())
                    .collect();
                candidates.sort();

                let mut to_delete = Vec::new();
                for name in candidates.into_iter().take(excess) {
                    let svc = self
                        .services
                        .iter_mut()
                        .find(|s| s.name == name)
                        .expect("candidate name came from self.services");
                    match svc.state {
                        ServiceState::Online | ServiceState::Scheduled => {
                            svc.transition(ServiceState::Stopping)
                                .expect("Online/Scheduled -> Stopping is a legal edge");
                            if let Some(slave_name) = svc.slave_name.clone() {
                                actions.push(SchedulerAction::Send {
                                    slave_name,
                                    payload: Payload::StopService(StopService {
                                        service_name: svc.name.clone(),
                                    }),
                                });
                            }
                        }
                        ServiceState::Pending | ServiceState::Waiting => {
                            to_delete.push(name);
                        }
                        _ => {}
                    }
                }
                self.services.retain(|s| !to_delete.contains(&s.name));
            }
        }

        for svc in self
            .services
            .iter_mut()
            .filter(|s| matches!(s.state, ServiceState::Pending | ServiceState::Waiting))
        {
            let group = match groups.iter().find(|g| g.name == svc.group_name) {
                Some(g) => g,
                None => continue, // group was removed; reload() will stop this service separately
            };
            match slaves.best_fit(group.memory_mib) {
                Some(slave_name) => {
                    let slave_name = slave_name.to_string();
                    svc.schedule_on(slave_name.clone())
                        .expect("slave_name is set before transitioning to Scheduled");
                    if let Some(slave) = slaves.get_mut(&slave_name) {
                        slave.memory_mib_free -= group.memory_mib;
                    }
                    actions.push(SchedulerAction::Send {
                        slave_name,
                        payload: Payload::ScheduleServiceRequest(ScheduleServiceRequest {
                            service: svc.clone(),
                            group: group.clone(),
                        }),
                    });
                }
                None => {
                    if svc.state == ServiceState::Pending {
                        svc.transition(ServiceState::Waiting)
                            .expect("Pending -> Waiting is a legal edge");
                    }
                    if self.logged_waiting.insert(svc.name.clone()) {
                        warn!(
                            "service '{}' is waiting: no slave has {} MiB free",
                            svc.name, group.memory_mib
                        );
                    }
                }
            }
        }

        actions
    }

    pub fn handle_service_online(&mut self, name: &str, port: u16, slaves: &SlaveRegistry) -> Result<Vec<SchedulerAction>> {
        let mut actions = Vec::new();
        let idx = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        self.services[idx].mark_online(port)?;
        self.logged_waiting.remove(name);

        let (kind, slave_name) = (
            self.services[idx].kind,
            self.services[idx].slave_name.clone(),
        );
        let host = slave_name
            .as_deref()
            .and_then(|n| slaves.get(n))
            .map(|s| s.remote_host.clone())
            .unwrap_or_default();

        match kind {
            GroupType::Server => {
                for proxy in self
                    .services
                    .iter()
                    .filter(|s| s.kind == GroupType::Proxy && s.state == ServiceState::Online)
                {
                    let proxy_slave = match &proxy.slave_name {
                        Some(s) => s.clone(),
                        None => continue,
                    };
                    actions.push(SchedulerAction::Send {
                        slave_name: proxy_slave,
                        payload: wrap_for_child(
                            &proxy.name,
                            Payload::ProxyRegisterServer(ProxyRegisterServer {
                                server_name: name.to_string(),
                                host: host.clone(),
                                port,
                            }),
                        )?,
                    });
                }
            }
            GroupType::Proxy => {
                let proxy_slave = match &slave_name {
                    Some(s) => s.clone(),
                    None => return Ok(actions),
                };
                for server in self
                    .services
                    .iter()
                    .filter(|s| s.kind == GroupType::Server && s.state == ServiceState::Online)
                {
                    let server_host = server
                        .slave_name
                        .as_deref()
                        .and_then(|n| slaves.get(n))
                        .map(|s| s.remote_host.clone())
                        .unwrap_or_default();
                    actions.push(SchedulerAction::Send {
                        slave_name: proxy_slave.clone(),
                        payload: wrap_for_child(
                            name,
                            Payload::ProxyRegisterServer(ProxyRegisterServer {
                                server_name: server.name.clone(),
                                host: server_host,
                                port: server.listen_port,
                            }),
                        )?,
                    });
                }
            }
        }

        Ok(actions)
    }

    pub fn handle_service_stopped(&mut self, name: &str, slaves: &mut SlaveRegistry) -> Result<Vec<SchedulerAction>> {
        let mut actions = Vec::new();
        let idx = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;

        let (kind, slave_name) = (
            self.services[idx].kind,
            self.services[idx].slave_name.clone(),
        );

        self.services[idx].transition(ServiceState::Offline)?;

        if let Some(slave_name) = &slave_name {
            if let Some(slave) = slaves.get_mut(slave_name) {
                // Restored from the service's own `memory_mib`, which was
                // copied from its group at creation time.
                slave.memory_mib_free = slave
                    .memory_mib_free
                    .saturating_add(self.services[idx].memory_mib);
            }
        }

        if kind == GroupType::Server {
            for proxy in self
                .services
                .iter()
                .filter(|s| s.kind == GroupType::Proxy && s.state == ServiceState::Online)
            {
                let proxy_slave = match &proxy.slave_name {
                    Some(s) => s.clone(),
                    None => continue,
                };
                actions.push(SchedulerAction::Send {
                    slave_name: proxy_slave,
                    payload: wrap_for_child(
                        &proxy.name,
                        Payload::ProxyUnregisterServer(ProxyUnregisterServer {
                            server_name: name.to_string(),
                        }),
                    )?,
                });
            }
        }

        Ok(actions)
    }

    pub fn handle_service_start_failed(&mut self, name: &str, slaves: &mut SlaveRegistry) -> Result<()> {
        let idx = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        let slave_name = self.services[idx].slave_name.clone();
        let memory_mib = self.services[idx].memory_mib;
        self.services[idx].transition(ServiceState::Offline)?;
        if let Some(slave_name) = slave_name {
            if let Some(slave) = slaves.get_mut(&slave_name) {
                slave.memory_mib_free = slave.memory_mib_free.saturating_add(memory_mib);
            }
        }
        Ok(())
    }

    /// The manual `stop service <name>` command and group restart both
    /// route through here: a live (Scheduled/Online) service is asked to
    /// stop; the authoritative `Offline` transition waits for
    /// `ServiceStopped`.
    pub fn stop_service(&mut self, name: &str) -> Result<Vec<SchedulerAction>> {
        let svc = self
            .services
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        if !svc.state.is_live() {
            return Err(Error::Lifecycle {
                name: name.to_string(),
                state: svc.state.to_string(),
            });
        }
        let slave_name = svc.slave_name.clone();
        svc.transition(ServiceState::Stopping)?;
        let mut actions = Vec::new();
        if let Some(slave_name) = slave_name {
            actions.push(SchedulerAction::Send {
                slave_name,
                payload: Payload::StopService(StopService {
                    service_name: name.to_string(),
                }),
            });
        }
        Ok(actions)
    }

    /// Delete a service outright. Only legal while it is `Pending`,
    /// `Waiting` or `Offline`.
    pub fn delete(&mut self, name: &str) -> Result<()> {
        let idx = self
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownService(name.to_string()))?;
        if !self.services[idx].state.deletable() {
            return Err(Error::Lifecycle {
                name: name.to_string(),
                state: self.services[idx].state.to_string(),
            });
        }
        self.services.remove(idx);
        Ok(())
    }

    /// `group restart <name>`: live services are stopped (the scheduler
    /// will recreate `min_services` replicas on the next ticks);
    /// not-yet-placed ones are deleted immediately so they get fresh names.
    pub fn restart_group(&mut self, group_name: &str) -> Result<Vec<SchedulerAction>> {
        let names: Vec<String> = self
            .services
            .iter()
            .filter(|s| s.group_name == group_name && s.state != ServiceState::Offline)
            .map(|s| s.name.clone())
            .collect();

        let mut actions = Vec::new();
        for name in names {
            let state = self.service(&name).map(|s| s.state);
            match state {
                Some(ServiceState::Pending) | Some(ServiceState::Waiting) => {
                    self.delete(&name)?;
                }
                Some(ServiceState::Scheduled) | Some(ServiceState::Online) => {
                    actions.extend(self.stop_service(&name)?);
                }
                _ => {}
            }
        }
        Ok(actions)
    }

    /// A group was removed by a reload: stop or delete every service still
    /// bound to it.
    pub fn remove_group_services(&mut self, group_name: &str) -> Result<Vec<SchedulerAction>> {
        self.restart_group(group_name)
    }

    /// A slave vanished: every service bound to it is forced to `Offline`
    /// immediately (not merely `Stopping`), and is swept away on the next
    /// reconciliation tick.
    pub fn handle_slave_disconnected(&mut self, slave_name: &str) {
        for svc in self
            .services
            .iter_mut()
            .filter(|s| s.slave_name.as_deref() == Some(slave_name))
        {
            warn!("service '{}' lost its slave '{slave_name}'", svc.name);
            svc.force_offline();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn group(name: &str, min: u32, max: u32, memory: u32) -> Group {
        Group {
            name: name.into(),
            kind: GroupType::Proxy,
            min_services: min,
            max_services: max,
            memory_mib: memory,
            start_port: 25565,
        }
    }

    fn registry_with(slaves: &[(&str, u32)]) -> SlaveRegistry {
        let mut reg = SlaveRegistry::new();
        for (name, mem) in slaves {
            let (tx, _rx) = mpsc::channel(8);
            reg.register(name.to_string(), "127.0.0.1".into(), *mem, tx).unwrap();
        }
        reg
    }

    #[test]
    fn reconcile_creates_and_places_up_to_min() {
        let mut sched = Scheduler::new();
        let mut slaves = registry_with(&[("s1", 1024)]);
        let groups = vec![group("lobby", 1, 1, 512)];

        let actions = sched.reconcile(&groups, &mut slaves);
        assert_eq!(sched.services().len(), 1);
        assert_eq!(sched.services()[0].state, ServiceState::Scheduled);
        assert_eq!(slaves.get("s1").unwrap().memory_mib_free, 512);
        assert!(matches!(actions[0], SchedulerAction::Send { .. }));
    }

    #[test]
    fn reconcile_leaves_service_waiting_without_capacity() {
        let mut sched = Scheduler::new();
        let mut slaves = registry_with(&[("s1", 256)]);
        let groups = vec![group("lobby", 1, 1, 512)];

        sched.reconcile(&groups, &mut slaves);
        assert_eq!(sched.services()[0].state, ServiceState::Waiting);
    }

    #[test]
    fn eviction_stops_online_and_deletes_pending_surplus() {
        let mut sched = Scheduler::new();
        let mut slaves = registry_with(&[("s1", 4096)]);
        let groups = vec![group("lobby", 2, 2, 512)];
        sched.reconcile(&groups, &mut slaves);
        sched.services.iter_mut().for_each(|s| {
            s.mark_online(25565).unwrap();
        });

        let shrunk = vec![group("lobby", 0, 0, 512)];
        let actions = sched.reconcile(&shrunk, &mut slaves);
        assert!(sched
            .services()
            .iter()
            .all(|s| s.state == ServiceState::Stopping));
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn names_reuse_smallest_free_integer() {
        let mut sched = Scheduler::new();
        let mut slaves = registry_with(&[("s1", 4096)]);
        let groups = vec![group("lobby", 2, 2, 512)];
        sched.reconcile(&groups, &mut slaves);
        sched.delete("lobby-01").unwrap();
        sched.reconcile(&groups, &mut slaves);
        assert!(sched.service("lobby-01").is_some());
    }

    #[test]
    fn server_online_notifies_existing_online_proxies() {
        let mut sched = Scheduler::new();
        let mut slaves = registry_with(&[("s1", 4096)]);

        sched.services.push(Service::new_pending("lobby-01".into(), GroupType::Proxy, "lobby".into(), 512));
        sched.services[0].schedule_on("s1".into()).unwrap();
        sched.services[0].mark_online(25565).unwrap();

        sched.services.push(Service::new_pending("survival-01".into(), GroupType::Server, "survival".into(), 512));
        sched.services[1].schedule_on("s1".into()).unwrap();

        let actions = sched.handle_service_online("survival-01", 25566, &slaves).unwrap();
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn stop_service_requires_a_live_state() {
        let mut sched = Scheduler::new();
        sched
            .services
            .push(Service::new_pending("lobby-01".into(), GroupType::Proxy, "lobby".into(), 512));
        assert!(sched.stop_service("lobby-01").is_err());
    }
}
