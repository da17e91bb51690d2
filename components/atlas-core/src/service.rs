use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Runtime state of one managed child process. Never persisted; reconstructed
/// by the scheduler every time the master starts.
///
/// Pending -> Waiting  (no slave had enough free memory)
/// Pending -> Scheduled (placed immediately)
/// Waiting -> Scheduled (placed on a later tick)
/// Scheduled -> Online  (child called back)
/// Scheduled -> Offline (spawn failed on the slave)
/// Online -> Stopping   (graceful stop requested)
/// Stopping -> Offline  (child process exited)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Pending,
    Waiting,
    Scheduled,
    Online,
    Stopping,
    Offline,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Pending => "pending",
            ServiceState::Waiting => "waiting",
            ServiceState::Scheduled => "scheduled",
            ServiceState::Online => "online",
            ServiceState::Stopping => "stopping",
            ServiceState::Offline => "offline",
        };
        write!(f, "{}", s)
    }
}

impl ServiceState {
    /// Whether `self -> next` is one of the edges enumerated above. Checked
    /// at every mutation site rather than trusted, per the "reject illegal
    /// transitions" redesign flag.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Pending, Waiting)
                | (Pending, Scheduled)
                | (Waiting, Scheduled)
                | (Scheduled, Online)
                | (Scheduled, Offline)
                | (Scheduled, Stopping)
                | (Online, Stopping)
                | (Stopping, Offline)
        )
    }

    /// Whether a service in this state is bound to a slave and can be asked
    /// to stop (the manual `stop service` command and group restart use
    /// this instead of re-checking `slave_name` directly).
    pub fn is_live(self) -> bool {
        matches!(self, ServiceState::Scheduled | ServiceState::Online)
    }

    /// Whether a service in this state may be deleted from the registry.
    pub fn deletable(self) -> bool {
        matches!(
            self,
            ServiceState::Pending | ServiceState::Waiting | ServiceState::Offline
        )
    }
}

use crate::group::GroupType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: GroupType,
    pub group_name: String,
    pub slave_name: Option<String>,
    pub listen_port: u16,
    pub memory_mib: u32,
    pub state: ServiceState,
}

impl Service {
    pub fn new_pending(name: String, kind: GroupType, group_name: String, memory_mib: u32) -> Self {
        Service {
            name,
            kind,
            group_name,
            slave_name: None,
            listen_port: 0,
            memory_mib,
            state: ServiceState::Pending,
        }
    }

    /// Apply a state transition, enforcing the table in [`ServiceState`] and
    /// the `slave_name`/`listen_port` invariants from the data model.
    pub fn transition(&mut self, next: ServiceState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        if matches!(next, ServiceState::Offline) {
            self.slave_name = None;
            self.listen_port = 0;
        }
        if matches!(next, ServiceState::Scheduled) && self.slave_name.is_none() {
            return Err(Error::Validation(
                "cannot enter Scheduled without a slave_name".into(),
            ));
        }
        self.state = next;
        Ok(())
    }

    pub fn schedule_on(&mut self, slave_name: String) -> Result<()> {
        self.slave_name = Some(slave_name);
        self.transition(ServiceState::Scheduled)
    }

    pub fn mark_online(&mut self, port: u16) -> Result<()> {
        self.transition(ServiceState::Online)?;
        self.listen_port = port;
        Ok(())
    }

    /// Force a service straight to `Offline` regardless of its current
    /// state. This is the slave-disconnect escape hatch: the normal
    /// transition table intentionally has no `Online -> Offline` edge
    /// (online services must go through `Stopping`), but a slave vanishing
    /// is an externally-forced event, not a lifecycle step the scheduler
    /// chose to take.
    pub fn force_offline(&mut self) {
        self.state = ServiceState::Offline;
        self.slave_name = None;
        self.listen_port = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Service {
        Service::new_pending("lobby-01".into(), GroupType::Proxy, "lobby".into(), 512)
    }

    #[test]
    fn pending_can_go_waiting() {
        let mut svc = pending();
        svc.transition(ServiceState::Waiting).unwrap();
        assert_eq!(svc.state, ServiceState::Waiting);
    }

    #[test]
    fn cannot_skip_to_online() {
        let mut svc = pending();
        assert!(svc.transition(ServiceState::Online).is_err());
    }

    #[test]
    fn scheduled_requires_slave_name() {
        let mut svc = pending();
        assert!(svc.transition(ServiceState::Scheduled).is_err());
        svc.slave_name = Some("s1".into());
        svc.transition(ServiceState::Scheduled).unwrap();
    }

    #[test]
    fn offline_clears_slave_and_port() {
        let mut svc = pending();
        svc.schedule_on("s1".into()).unwrap();
        svc.mark_online(25565).unwrap();
        svc.transition(ServiceState::Stopping).unwrap();
        svc.transition(ServiceState::Offline).unwrap();
        assert!(svc.slave_name.is_none());
        assert_eq!(svc.listen_port, 0);
    }

    #[test]
    fn only_pending_waiting_offline_are_deletable() {
        assert!(ServiceState::Pending.deletable());
        assert!(ServiceState::Waiting.deletable());
        assert!(ServiceState::Offline.deletable());
        assert!(!ServiceState::Scheduled.deletable());
        assert!(!ServiceState::Online.deletable());
        assert!(!ServiceState::Stopping.deletable());
    }
}
