//! Transport selection contracts.
//!
//! Byte-level transports live outside this workspace. The client only picks
//! one by kind, opens it and then exchanges whole envelopes with it.

use std::{fmt, net::SocketAddr};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thin_client_core::Envelope;
use thiserror::Error;

use crate::protocol::CodecError;

/// Kind of transport an assignment asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssl,
    Tcp,
    /// Reserved; no client implementation exists.
    Grpc,
}

impl TransportKind {
    /// Whether opening this transport needs a pinned certificate.
    #[must_use]
    pub const fn requires_certificate(self) -> bool {
        matches!(self, Self::Ssl)
    }

    #[must_use]
    pub const fn is_supported(self) -> bool {
        !matches!(self, Self::Grpc)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ssl => "ssl",
            Self::Tcp => "tcp",
            Self::Grpc => "grpc",
        })
    }
}

const PEM_CERTIFICATE_HEADER: &[u8] = b"-----BEGIN CERTIFICATE-----";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Certificate is not PEM encoded")]
pub struct CertificateError;

/// PEM-encoded engine certificate used to pin SSL connections.
#[derive(Clone, PartialEq, Eq)]
pub struct Certificate(Bytes);

impl Certificate {
    /// Wrap PEM bytes.
    ///
    /// # Errors
    /// Returns error if the bytes hold no PEM certificate block.
    pub fn from_pem(pem: impl Into<Bytes>) -> Result<Self, CertificateError> {
        let pem = pem.into();
        if pem
            .windows(PEM_CERTIFICATE_HEADER.len())
            .any(|w| w == PEM_CERTIFICATE_HEADER)
        {
            Ok(Self(pem))
        } else {
            Err(CertificateError)
        }
    }

    #[must_use]
    pub fn as_pem(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Certificate")
            .field(&format_args!("{} bytes", self.0.len()))
            .finish()
    }
}

/// Why a connection ended.
///
/// Non-negative values are reasons sent by the engine for a clean close;
/// negative values are network-layer error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectReason(i32);

impl DisconnectReason {
    /// The client dropped the connection itself.
    pub const ABORTED: Self = Self(-3);
    /// The connection parameters were unusable.
    pub const INVALID_ARGUMENT: Self = Self(-4);
    pub const CONNECTION_CLOSED: Self = Self(-100);
    pub const CONNECTION_RESET: Self = Self(-101);
    pub const CONNECTION_REFUSED: Self = Self(-102);
    /// The engine sent something that could not be decoded.
    pub const INVALID_RESPONSE: Self = Self(-320);

    #[must_use]
    pub const fn new(code: i32) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn code(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn is_remote_initiated(self) -> bool {
        self.0 >= 0
    }

    #[must_use]
    pub const fn is_network_error(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_remote_initiated() {
            write!(f, "closed by engine ({})", self.0)
        } else {
            write!(f, "network error {}", self.0)
        }
    }
}

/// Connection failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Engine closed the connection (reason {0})")]
    RemoteClosed(u16),
    #[error("Network error {}: {message}", .reason.code())]
    Network {
        reason: DisconnectReason,
        message: String,
    },
    #[error("Frame error: {0}")]
    Codec(#[from] CodecError),
}

impl ConnectionError {
    /// Build a network-layer error.
    #[must_use]
    pub fn network(reason: DisconnectReason, message: impl Into<String>) -> Self {
        Self::Network {
            reason,
            message: message.into(),
        }
    }

    /// The signed disconnect reason this error is reported as.
    #[must_use]
    pub const fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::RemoteClosed(reason) => DisconnectReason(*reason as i32),
            Self::Network { reason, .. } => *reason,
            Self::Codec(_) => DisconnectReason::INVALID_RESPONSE,
        }
    }
}

/// An open, authenticated-or-not stream of envelopes.
#[async_trait]
pub trait Connection: Send {
    /// Wait for the next inbound envelope. Must be cancel safe.
    async fn recv(&mut self) -> Result<Envelope, ConnectionError>;

    /// Write one envelope.
    async fn send(&mut self, envelope: Envelope) -> Result<(), ConnectionError>;

    /// Close the connection. Further calls fail.
    async fn close(&mut self);
}

/// A transport ready to be opened.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the transport.
    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// Builds transports of each supported kind.
pub trait TransportFactory: Send + Sync {
    fn tcp(&self, endpoint: SocketAddr) -> Box<dyn Transport>;

    fn ssl(&self, endpoint: SocketAddr, certificate: Certificate) -> Box<dyn Transport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_classification() {
        assert!(DisconnectReason::new(5).is_remote_initiated());
        assert!(!DisconnectReason::new(5).is_network_error());
        assert!(DisconnectReason::new(0).is_remote_initiated());
        assert!(DisconnectReason::new(-7).is_network_error());
        assert!(DisconnectReason::ABORTED.is_network_error());
    }

    #[test]
    fn test_connection_error_reasons() {
        assert_eq!(
            ConnectionError::RemoteClosed(5).disconnect_reason(),
            DisconnectReason::new(5)
        );
        assert_eq!(
            ConnectionError::network(DisconnectReason::CONNECTION_RESET, "reset")
                .disconnect_reason(),
            DisconnectReason::CONNECTION_RESET
        );
        assert_eq!(
            ConnectionError::Codec(CodecError::Malformed("x".into())).disconnect_reason(),
            DisconnectReason::INVALID_RESPONSE
        );
    }

    #[test]
    fn test_certificate_requires_pem_block() {
        assert!(Certificate::from_pem(Bytes::from_static(b"not a cert")).is_err());
        let pem: &'static [u8] = b"-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let cert = Certificate::from_pem(Bytes::from_static(pem)).unwrap();
        assert_eq!(cert.as_pem(), pem);
    }

    #[test]
    fn test_transport_kind_requirements() {
        assert!(TransportKind::Ssl.requires_certificate());
        assert!(!TransportKind::Tcp.requires_certificate());
        assert!(!TransportKind::Grpc.is_supported());
        assert_eq!(TransportKind::Ssl.to_string(), "ssl");
    }
}
