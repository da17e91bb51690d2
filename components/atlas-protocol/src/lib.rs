pub mod envelope;
pub mod framing;
pub mod payload;

pub use envelope::Envelope;
pub use framing::{read_packet, write_packet};
pub use payload::*;
