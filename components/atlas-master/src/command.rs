use atlas_core::{Group, Service};
use atlas_protocol::Payload;
use atlas_queue::Reply;
use tokio::sync::mpsc;

/// Every mutation of master state funnels through one of these. Producers:
/// the slave listener's per-connection reader tasks, the reconciliation
/// ticker, and the REPL reader task.
pub enum MasterCommand {
    SlaveConnected {
        name: String,
        remote_host: String,
        memory_mib: u32,
        outbound: mpsc::Sender<Payload>,
        reply: Reply<Result<(), String>>,
    },
    SlaveDisconnected {
        name: String,
    },
    HandleSlavePacket {
        slave_name: String,
        payload: Payload,
    },

    ScheduleServices,

    GroupCreate {
        group: Group,
        reply: Reply<Result<(), String>>,
    },
    GroupList {
        reply: Reply<Vec<Group>>,
    },
    GroupReload {
        reply: Reply<Result<(), String>>,
    },
    GroupRestart {
        name: String,
        reply: Reply<Result<(), String>>,
    },
    ServiceList {
        reply: Reply<Vec<Service>>,
    },
    ServiceStop {
        name: String,
        reply: Reply<Result<(), String>>,
    },
    ScreenAttach {
        name: String,
        reply: Reply<Result<(), String>>,
    },
    ScreenDetach {
        reply: Reply<Result<(), String>>,
    },
    ScreenExecute {
        command: String,
        reply: Reply<Result<(), String>>,
    },

    Shutdown,
}
