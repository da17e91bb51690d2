use atlas_core::Error;

use crate::payload::*;

/// What actually goes on the wire inside the length prefix: a type name and
/// the bincode-serialized variant body. Kept as an explicit struct (rather
/// than letting bincode tag the `Payload` enum itself) so the type name is a
/// self-describing string per the protocol contract, not an opaque integer
/// discriminant.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Envelope {
    pub type_name: String,
    pub body: Vec<u8>,
}

impl Envelope {
    pub fn wrap(payload: &Payload) -> Result<Envelope, Error> {
        let body = encode_body(payload)?;
        Ok(Envelope {
            type_name: payload.type_name().to_string(),
            body,
        })
    }

    pub fn unwrap_payload(&self) -> Result<Payload, Error> {
        decode_body(&self.type_name, &self.body)
    }
}

fn encode_body(payload: &Payload) -> Result<Vec<u8>, Error> {
    let body = match payload {
        Payload::Authenticate(p) => bincode::serialize(p),
        Payload::AuthSuccess(p) => bincode::serialize(p),
        Payload::AuthFailed(p) => bincode::serialize(p),
        Payload::ScheduleServiceRequest(p) => bincode::serialize(p),
        Payload::StopService(p) => bincode::serialize(p),
        Payload::ServiceStartFailed(p) => bincode::serialize(p),
        Payload::ServiceOnline(p) => bincode::serialize(p),
        Payload::ServiceStopped(p) => bincode::serialize(p),
        Payload::ServiceConnect(p) => bincode::serialize(p),
        Payload::ProxyRegisterServer(p) => bincode::serialize(p),
        Payload::ProxyUnregisterServer(p) => bincode::serialize(p),
        Payload::AttachScreen(p) => bincode::serialize(p),
        Payload::DetachScreen(p) => bincode::serialize(p),
        Payload::ScreenLine(p) => bincode::serialize(p),
        Payload::ExecuteServiceCommand(p) => bincode::serialize(p),
        Payload::ServiceEnvelope(p) => bincode::serialize(p),
        Payload::Shutdown(p) => bincode::serialize(p),
    };
    body.map_err(Error::from)
}

/// Look up `type_name` and decode `body` into the matching [`Payload`]
/// variant. Unknown type names are a decode error; the caller is expected to
/// abort the connection on this error per the transport contract.
fn decode_body(type_name: &str, body: &[u8]) -> Result<Payload, Error> {
    macro_rules! decode {
        ($variant:ident) => {
            bincode::deserialize(body)
                .map(Payload::$variant)
                .map_err(Error::from)
        };
    }
    match type_name {
        "atlas.protocol.Authenticate" => decode!(Authenticate),
        "atlas.protocol.AuthSuccess" => decode!(AuthSuccess),
        "atlas.protocol.AuthFailed" => decode!(AuthFailed),
        "atlas.protocol.ScheduleServiceRequest" => decode!(ScheduleServiceRequest),
        "atlas.protocol.StopService" => decode!(StopService),
        "atlas.protocol.ServiceStartFailed" => decode!(ServiceStartFailed),
        "atlas.protocol.ServiceOnline" => decode!(ServiceOnline),
        "atlas.protocol.ServiceStopped" => decode!(ServiceStopped),
        "atlas.protocol.ServiceConnect" => decode!(ServiceConnect),
        "atlas.protocol.ProxyRegisterServer" => decode!(ProxyRegisterServer),
        "atlas.protocol.ProxyUnregisterServer" => decode!(ProxyUnregisterServer),
        "atlas.protocol.AttachScreen" => decode!(AttachScreen),
        "atlas.protocol.DetachScreen" => decode!(DetachScreen),
        "atlas.protocol.ScreenLine" => decode!(ScreenLine),
        "atlas.protocol.ExecuteServiceCommand" => decode!(ExecuteServiceCommand),
        "atlas.protocol.ServiceEnvelope" => decode!(ServiceEnvelope),
        "atlas.protocol.Shutdown" => decode!(Shutdown),
        other => Err(Error::UnknownPayloadType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_variant() {
        let payload = Payload::AuthFailed(AuthFailed {
            message: "bad key".into(),
        });
        let env = Envelope::wrap(&payload).unwrap();
        assert_eq!(env.type_name, "atlas.protocol.AuthFailed");
        let decoded = env.unwrap_payload().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn round_trips_a_nested_variant() {
        use atlas_core::{Group, GroupType, Service};
        let payload = Payload::ScheduleServiceRequest(ScheduleServiceRequest {
            service: Service::new_pending("lobby-01".into(), GroupType::Proxy, "lobby".into(), 512),
            group: Group {
                name: "lobby".into(),
                kind: GroupType::Proxy,
                min_services: 1,
                max_services: 1,
                memory_mib: 512,
                start_port: 25565,
            },
        });
        let env = Envelope::wrap(&payload).unwrap();
        let decoded = env.unwrap_payload().unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn unknown_type_name_is_a_decode_error() {
        let env = Envelope {
            type_name: "atlas.protocol.DoesNotExist".into(),
            body: vec![],
        };
        assert!(env.unwrap_payload().is_err());
    }
}
