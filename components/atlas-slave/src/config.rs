use serde::{Deserialize, Serialize};

/// `slave.yaml` — this node's identity, the master it reports to, and the
/// template file server it syncs from. Mirrors
/// `original_source/slave/main.go`'s inline `config` struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    pub name: String,
    pub master_addr: String,
    /// Where the child-callback listener binds, e.g. `0.0.0.0:6000`.
    pub bind_addr: String,
    pub file_server_host: String,
    pub file_server_port: u16,
    pub secret_key: String,
    pub memory_mib: u32,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        SlaveConfig {
            name: "slave-01".into(),
            master_addr: "127.0.0.1:5000".into(),
            bind_addr: "0.0.0.0:6000".into(),
            file_server_host: "127.0.0.1".into(),
            file_server_port: 5001,
            secret_key: String::new(),
            memory_mib: 1024,
        }
    }
}
