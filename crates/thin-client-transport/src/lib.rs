//! Transport layer for the thin client.
//!
//! Provides:
//! - Transport selection contracts (`Transport`, `Connection`, `TransportFactory`)
//! - Wire framing (JSON + base64)
//! - In-memory channel transport for tests and demos

pub mod channel;
pub mod protocol;
pub mod transport;

pub use channel::{ChannelTransportFactory, EngineEnd, channel_pair};
pub use protocol::{CodecError, decode_frame, encode_frame};
pub use transport::{
    Certificate, CertificateError, Connection, ConnectionError, DisconnectReason, Transport,
    TransportFactory, TransportKind,
};
