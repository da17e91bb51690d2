use atlas_protocol::Payload;
use tokio::sync::mpsc;

use atlas_core::{Error, Result};

/// Runtime record of one connected slave. Free memory is decremented when
/// the scheduler places a service on it and restored when that service
/// reaches `Offline` — never on any other path (see Open Questions in
/// SPEC_FULL.md).
pub struct SlaveHandle {
    pub name: String,
    pub remote_host: String,
    pub memory_mib_total: u32,
    pub memory_mib_free: u32,
    pub authenticated: bool,
    /// Feeds the slave connection's dedicated writer task. Sends are
    /// non-blocking (`try_send`); a full channel or closed receiver is
    /// logged and dropped rather than stalling the command-queue consumer.
    pub outbound: mpsc::Sender<Payload>,
}

#[derive(Default)]
pub struct SlaveRegistry {
    slaves: Vec<SlaveHandle>,
}

impl SlaveRegistry {
    pub fn new() -> Self {
        SlaveRegistry { slaves: Vec::new() }
    }

    pub fn register(
        &mut self,
        name: String,
        remote_host: String,
        memory_mib: u32,
        outbound: mpsc::Sender<Payload>,
    ) -> Result<()> {
        if self.slaves.iter().any(|s| s.name == name) {
            return Err(Error::DuplicateSlave(name));
        }
        self.slaves.push(SlaveHandle {
            name,
            remote_host,
            memory_mib_total: memory_mib,
            memory_mib_free: memory_mib,
            authenticated: true,
            outbound,
        });
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<SlaveHandle> {
        let idx = self.slaves.iter().position(|s| s.name == name)?;
        Some(self.slaves.remove(idx))
    }

    pub fn get(&self, name: &str) -> Option<&SlaveHandle> {
        self.slaves.iter().find(|s| s.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut SlaveHandle> {
        self.slaves.iter_mut().find(|s| s.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaveHandle> {
        self.slaves.iter()
    }

    /// Best-fit decreasing slack: the authenticated slave with the smallest
    /// free memory that is still >= `required_mib`. Ties are broken by
    /// iteration order (first one wins), which keeps placement stable.
    pub fn best_fit(&self, required_mib: u32) -> Option<&str> {
        self.slaves
            .iter()
            .filter(|s| s.authenticated && s.memory_mib_free >= required_mib)
            .min_by_key(|s| s.memory_mib_free)
            .map(|s| s.name.as_str())
    }

    pub fn send_to(&self, name: &str, payload: Payload) {
        if let Some(slave) = self.get(name) {
            if let Err(err) = slave.outbound.try_send(payload) {
                log::warn!("failed to queue packet for slave '{name}': {err}");
            }
        }
    }

    pub fn broadcast(&self, payload_fn: impl Fn() -> Payload) {
        for slave in &self.slaves {
            if let Err(err) = slave.outbound.try_send(payload_fn()) {
                log::warn!("failed to queue broadcast packet for slave '{}': {err}", slave.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(name: &str, free: u32) -> (mpsc::Receiver<Payload>, SlaveHandle) {
        let (tx, rx) = mpsc::channel(8);
        (
            rx,
            SlaveHandle {
                name: name.into(),
                remote_host: "127.0.0.1".into(),
                memory_mib_total: free,
                memory_mib_free: free,
                authenticated: true,
                outbound: tx,
            },
        )
    }

    #[test]
    fn best_fit_picks_smallest_sufficient_slack() {
        let mut reg = SlaveRegistry::new();
        let (_r1, s1) = handle("s1", 2048);
        let (_r2, s2) = handle("s2", 1024);
        let (_r3, s3) = handle("s3", 4096);
        reg.slaves.push(s1);
        reg.slaves.push(s2);
        reg.slaves.push(s3);

        assert_eq!(reg.best_fit(512), Some("s2"));
        assert_eq!(reg.best_fit(4096), Some("s3"));
        assert_eq!(reg.best_fit(8192), None);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = SlaveRegistry::new();
        let (tx, _rx) = mpsc::channel(8);
        reg.register("s1".into(), "127.0.0.1".into(), 1024, tx.clone())
            .unwrap();
        assert!(reg.register("s1".into(), "127.0.0.1".into(), 1024, tx).is_err());
    }
}
