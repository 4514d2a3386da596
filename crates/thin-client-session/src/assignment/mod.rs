//! Engine assignment.
//!
//! An assignment names the engine a client should connect to and how. It is
//! obtained once per connect from the assigner service, or taken from an
//! [`EngineOverride`] in the config.

pub mod http;

use std::{fmt, net::SocketAddr};

use serde::Deserialize;
use thin_client_core::{RelayReceiver, RelaySender, relay};
use thin_client_transport::{Certificate, TransportKind};
use thiserror::Error;

use crate::config::{EngineOverride, SessionConfig};

pub use http::HttpAssignerClient;

/// Result of one assignment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentResult {
    Ok,
    BadRequest,
    BadResponse,
    InvalidProtocolVersion,
    ExpiredAccessToken,
    UserInvalid,
    OutOfVms,
    ServerError,
    ServerInterrupted,
    NetworkFailure,
    InvalidCert,
    Unknown,
}

impl AssignmentResult {
    /// Map an assigner HTTP status.
    #[must_use]
    pub const fn from_http_status(status: u16) -> Self {
        match status {
            200 => Self::Ok,
            400 => Self::BadRequest,
            401 => Self::ExpiredAccessToken,
            403 => Self::UserInvalid,
            412 => Self::InvalidProtocolVersion,
            429 => Self::OutOfVms,
            500 => Self::ServerError,
            503 => Self::ServerInterrupted,
            _ => Self::Unknown,
        }
    }

    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl fmt::Display for AssignmentResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::BadRequest => "bad request",
            Self::BadResponse => "bad response",
            Self::InvalidProtocolVersion => "invalid protocol version",
            Self::ExpiredAccessToken => "expired access token",
            Self::UserInvalid => "user invalid",
            Self::OutOfVms => "out of engines",
            Self::ServerError => "server error",
            Self::ServerInterrupted => "server interrupted",
            Self::NetworkFailure => "network failure",
            Self::InvalidCert => "invalid certificate",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Why an assignment cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidAssignment {
    #[error("{0} transport requires a certificate")]
    MissingCertificate(TransportKind),
    #[error("{0} transport is not supported")]
    UnsupportedTransport(TransportKind),
}

/// Where and how to reach an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub transport: TransportKind,
    pub endpoint: SocketAddr,

    /// Authenticates the client in the start-connection handshake.
    pub client_token: String,
    pub certificate: Option<Certificate>,
}

impl Assignment {
    /// Check that a transport can be built from this assignment.
    ///
    /// # Errors
    /// Returns error for unsupported transports and secure transports
    /// without a certificate.
    pub const fn validate(&self) -> Result<(), InvalidAssignment> {
        if !self.transport.is_supported() {
            return Err(InvalidAssignment::UnsupportedTransport(self.transport));
        }
        if self.transport.requires_certificate() && self.certificate.is_none() {
            return Err(InvalidAssignment::MissingCertificate(self.transport));
        }
        Ok(())
    }
}

/// Result code plus the assignment, present only on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentOutcome {
    pub result: AssignmentResult,
    pub assignment: Option<Assignment>,
}

impl AssignmentOutcome {
    #[must_use]
    pub const fn ok(assignment: Assignment) -> Self {
        Self {
            result: AssignmentResult::Ok,
            assignment: Some(assignment),
        }
    }

    #[must_use]
    pub const fn failed(result: AssignmentResult) -> Self {
        Self {
            result,
            assignment: None,
        }
    }
}

/// Body returned by the assigner on success.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignerResponse {
    client_token: String,
    host: String,
    port: u16,
    certificate: String,
}

/// Turn a successful assigner body into an outcome.
#[must_use]
pub fn parse_assigner_response(body: &[u8]) -> AssignmentOutcome {
    let response: AssignerResponse = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Malformed assigner response: {e}");
            return AssignmentOutcome::failed(AssignmentResult::BadResponse);
        }
    };

    if response.client_token.is_empty() {
        tracing::warn!("Assigner response has an empty client token");
        return AssignmentOutcome::failed(AssignmentResult::BadResponse);
    }

    let endpoint = match response.host.parse() {
        Ok(ip) => SocketAddr::new(ip, response.port),
        Err(_) => {
            tracing::warn!(host = %response.host, "Assigner host is not an IP address");
            return AssignmentOutcome::failed(AssignmentResult::BadResponse);
        }
    };

    let Ok(certificate) = Certificate::from_pem(response.certificate.into_bytes()) else {
        tracing::warn!("Assigner certificate is not a PEM certificate");
        return AssignmentOutcome::failed(AssignmentResult::InvalidCert);
    };

    AssignmentOutcome::ok(Assignment {
        transport: TransportKind::Ssl,
        endpoint,
        client_token: response.client_token,
        certificate: Some(certificate),
    })
}

/// Client of the assigner service.
pub trait AssignerClient {
    /// Start one request. Exactly one outcome is posted to `reply`.
    fn request_assignment(
        &self,
        access_token: &str,
        protocol_version: u32,
        reply: RelaySender<AssignmentOutcome>,
    );
}

/// Fetches assignments, one request per [`AssignmentFetcher::fetch`].
pub struct AssignmentFetcher {
    client: Box<dyn AssignerClient>,
    /// Resolved once at construction so `fetch` never touches the disk.
    override_outcome: Option<AssignmentOutcome>,
    protocol_version: u32,
    reply_tx: RelaySender<AssignmentOutcome>,
    reply_rx: RelayReceiver<AssignmentOutcome>,
}

impl AssignmentFetcher {
    /// Create a fetcher. An engine override's certificate is read here; a
    /// failure to read it is reported by every later `fetch`.
    #[must_use]
    pub fn new(config: &SessionConfig, client: Box<dyn AssignerClient>) -> Self {
        let (reply_tx, reply_rx) = relay();
        Self {
            client,
            override_outcome: config.engine_override.as_ref().map(override_outcome),
            protocol_version: config.protocol_version,
            reply_tx,
            reply_rx,
        }
    }

    /// Request an assignment. The outcome shows up in
    /// [`AssignmentFetcher::process_pending`]; failures are not retried.
    pub fn fetch(&self, access_token: &str) {
        if let Some(outcome) = &self.override_outcome {
            tracing::info!(result = %outcome.result, "Using engine override");
            self.reply_tx.post(outcome.clone());
            return;
        }

        tracing::debug!(
            protocol_version = self.protocol_version,
            "Requesting engine assignment"
        );
        self.client
            .request_assignment(access_token, self.protocol_version, self.reply_tx.clone());
    }

    /// Outcomes delivered since the last call.
    pub fn process_pending(&mut self) -> Vec<AssignmentOutcome> {
        self.reply_rx.drain()
    }
}

impl fmt::Debug for AssignmentFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssignmentFetcher")
            .field("override_outcome", &self.override_outcome)
            .field("protocol_version", &self.protocol_version)
            .finish_non_exhaustive()
    }
}

fn override_outcome(engine: &EngineOverride) -> AssignmentOutcome {
    let certificate = match &engine.certificate_path {
        None => None,
        Some(path) => match std::fs::read(path).map(Certificate::from_pem) {
            Ok(Ok(certificate)) => Some(certificate),
            Ok(Err(_)) => {
                tracing::error!(path = %path.display(), "Override certificate is not PEM");
                return AssignmentOutcome::failed(AssignmentResult::InvalidCert);
            }
            Err(e) => {
                tracing::error!(path = %path.display(), "Failed to read override certificate: {e}");
                return AssignmentOutcome::failed(AssignmentResult::InvalidCert);
            }
        },
    };

    AssignmentOutcome::ok(Assignment {
        transport: engine.transport,
        endpoint: engine.endpoint,
        client_token: engine.client_token.clone(),
        certificate,
    })
}
