use atlas_protocol::Payload;
use tokio::sync::mpsc;

/// Every mutation of slave state funnels through one of these. Producers:
/// the master connection's reader task, the child callback listener, each
/// service's stdout/stderr pump and supervisor task.
pub enum SlaveCommand {
    MasterConnected {
        outbound: mpsc::Sender<Payload>,
    },
    MasterDisconnected,
    HandleMasterPacket(Payload),

    /// A child process presented its one-shot key on the callback listener.
    /// `outbound` feeds that connection's writer task, kept open afterwards
    /// as the service's control channel for `ServiceEnvelope` tunnels.
    ChildConnected {
        one_shot_key: String,
        outbound: mpsc::Sender<Payload>,
    },

    /// Fired once, `CONNECT_TIMEOUT` after a service was scheduled. A no-op
    /// if the service already connected by then.
    ConnectTimeout {
        name: String,
    },

    /// A line written to a service's stdout/stderr, forwarded only while a
    /// screen is attached (the ring buffer itself is updated directly by the
    /// pump task, not through the queue).
    ServiceLine {
        name: String,
        line: String,
    },

    ServiceExited {
        name: String,
    },

    Shutdown,
}
