use serde::{Deserialize, Serialize};

use atlas_core::random;

/// `master.yaml` — cluster-wide configuration. Regenerated with a fresh
/// `secret_key` the first time the master starts in a fresh state
/// directory, per [`atlas_core::config::load_or_init`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub bind_addr: String,
    pub file_server_bind_addr: String,
    pub secret_key: String,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            bind_addr: "0.0.0.0:5000".into(),
            file_server_bind_addr: "0.0.0.0:5001".into(),
            secret_key: random::hex(32),
        }
    }
}
