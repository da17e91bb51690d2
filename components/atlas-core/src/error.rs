use std::path::PathBuf;

/// The error kinds a node can hit, per the error-handling design: validation,
/// authentication, transport, capacity, lifecycle, process and timeout
/// failures each get their own variant so callers can match on kind rather
/// than parse a message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("group file '{path}' does not match its name '{name}'")]
    GroupNameMismatch { path: PathBuf, name: String },

    #[error("duplicate group name '{0}'")]
    DuplicateGroup(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("duplicate slave name '{0}'")]
    DuplicateSlave(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no slave has enough free memory for group '{0}'")]
    Capacity(String),

    #[error("service '{name}' cannot be deleted while in state {state}")]
    Lifecycle { name: String, state: String },

    #[error("illegal service state transition: {from} -> {to}")]
    IllegalTransition { from: String, to: String },

    #[error("process error: {0}")]
    Process(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("unknown wire type '{0}'")]
    UnknownPayloadType(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error in '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("bincode error: {0}")]
    Bincode(#[from] Box<bincode::ErrorKind>),
}

pub type Result<T> = std::result::Result<T, Error>;
