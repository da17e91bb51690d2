use serde::{Deserialize, Serialize};

use atlas_core::{Group, Service};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Authenticate {
    pub slave_name: String,
    pub secret_key: String,
    pub memory_mib: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthSuccess {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthFailed {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleServiceRequest {
    pub service: Service,
    pub group: Group,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopService {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStartFailed {
    pub service_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOnline {
    pub service_name: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStopped {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConnect {
    pub one_shot_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRegisterServer {
    pub server_name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyUnregisterServer {
    pub server_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachScreen {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetachScreen {
    pub service_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenLine {
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteServiceCommand {
    pub service_name: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEnvelope {
    pub service_name: String,
    pub inner_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shutdown {}

/// Closed sum type of every wire message. The registry-by-type-name pattern
/// from the source implementation is compiled out to this enum plus the
/// match in [`Payload::type_name`] / [`Payload::from_tagged`] — no runtime
/// reflection is involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Authenticate(Authenticate),
    AuthSuccess(AuthSuccess),
    AuthFailed(AuthFailed),
    ScheduleServiceRequest(ScheduleServiceRequest),
    StopService(StopService),
    ServiceStartFailed(ServiceStartFailed),
    ServiceOnline(ServiceOnline),
    ServiceStopped(ServiceStopped),
    ServiceConnect(ServiceConnect),
    ProxyRegisterServer(ProxyRegisterServer),
    ProxyUnregisterServer(ProxyUnregisterServer),
    AttachScreen(AttachScreen),
    DetachScreen(DetachScreen),
    ScreenLine(ScreenLine),
    ExecuteServiceCommand(ExecuteServiceCommand),
    ServiceEnvelope(ServiceEnvelope),
    Shutdown(Shutdown),
}

impl Payload {
    /// Fully-qualified type name placed on the wire in the envelope header.
    pub fn type_name(&self) -> &'static str {
        match self {
            Payload::Authenticate(_) => "atlas.protocol.Authenticate",
            Payload::AuthSuccess(_) => "atlas.protocol.AuthSuccess",
            Payload::AuthFailed(_) => "atlas.protocol.AuthFailed",
            Payload::ScheduleServiceRequest(_) => "atlas.protocol.ScheduleServiceRequest",
            Payload::StopService(_) => "atlas.protocol.StopService",
            Payload::ServiceStartFailed(_) => "atlas.protocol.ServiceStartFailed",
            Payload::ServiceOnline(_) => "atlas.protocol.ServiceOnline",
            Payload::ServiceStopped(_) => "atlas.protocol.ServiceStopped",
            Payload::ServiceConnect(_) => "atlas.protocol.ServiceConnect",
            Payload::ProxyRegisterServer(_) => "atlas.protocol.ProxyRegisterServer",
            Payload::ProxyUnregisterServer(_) => "atlas.protocol.ProxyUnregisterServer",
            Payload::AttachScreen(_) => "atlas.protocol.AttachScreen",
            Payload::DetachScreen(_) => "atlas.protocol.DetachScreen",
            Payload::ScreenLine(_) => "atlas.protocol.ScreenLine",
            Payload::ExecuteServiceCommand(_) => "atlas.protocol.ExecuteServiceCommand",
            Payload::ServiceEnvelope(_) => "atlas.protocol.ServiceEnvelope",
            Payload::Shutdown(_) => "atlas.protocol.Shutdown",
        }
    }
}
