pub mod config;
pub mod error;
pub mod group;
pub mod random;
pub mod service;

pub use error::{Error, Result};
pub use group::{Group, GroupType};
pub use service::{Service, ServiceState};
