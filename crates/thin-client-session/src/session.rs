//! Connection session: token, then assignment, then transport.

use std::{fmt, net::SocketAddr, sync::Arc};

use thin_client_core::{Envelope, RelayReceiver, RelaySender, relay};
use thin_client_transport::{DisconnectReason, TransportFactory};

use crate::{
    assignment::{AssignerClient, AssignmentFetcher, AssignmentResult},
    config::SessionConfig,
    identity::{CredentialBackend, IdentityEvent, IdentitySource, TokenError},
    network::{ClientNetworkComponents, NetworkEvent, NetworkHandle},
    status::{ConnectionEvent, ConnectionStatus},
};

/// What the session reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    AuthenticationFailed(TokenError),
    AssignmentFailed(AssignmentResult),
    Connected(SocketAddr),
    Disconnected(DisconnectReason),
    /// Envelope from the engine, to be routed by the feature routers.
    Inbound(Envelope),
}

/// Everything [`ConnectionSession::build`] wires together.
pub struct SessionParts {
    /// Main-context half.
    pub session: ConnectionSession,
    /// Network-context half; spawn [`ClientNetworkComponents::run`] on tokio.
    pub network: ClientNetworkComponents,
    /// Outbound sink for the feature routers.
    pub outbound: RelaySender<Envelope>,
}

/// Main-context orchestrator of one connection.
pub struct ConnectionSession {
    identity: IdentitySource,
    fetcher: AssignmentFetcher,
    network: NetworkHandle,
    network_events: RelayReceiver<NetworkEvent>,
    status: ConnectionStatus,
    /// Set once a token is handed to the fetcher, cleared when the attempt
    /// ends in `Connected`, `Disconnected` or an assignment failure.
    opening: bool,
}

impl ConnectionSession {
    /// Build both halves of a session and the relays between them.
    #[must_use]
    pub fn build(
        config: &SessionConfig,
        backend: Box<dyn CredentialBackend>,
        assigner: Box<dyn AssignerClient>,
        factory: Arc<dyn TransportFactory>,
    ) -> SessionParts {
        let (outbound, outbound_rx) = relay();
        let (events_tx, network_events) = relay();
        let (network, handle) = ClientNetworkComponents::new(
            factory,
            config.protocol_version,
            events_tx,
            outbound_rx,
        );

        let session = Self::from_parts(
            IdentitySource::new(backend, config.max_token_retries),
            AssignmentFetcher::new(config, assigner),
            handle,
            network_events,
        );

        SessionParts {
            session,
            network,
            outbound,
        }
    }

    #[must_use]
    pub fn from_parts(
        identity: IdentitySource,
        fetcher: AssignmentFetcher,
        network: NetworkHandle,
        network_events: RelayReceiver<NetworkEvent>,
    ) -> Self {
        Self {
            identity,
            fetcher,
            network,
            network_events,
            status: ConnectionStatus::new(),
            opening: false,
        }
    }

    /// Start connecting. No-op while connected or while a connect is
    /// already in progress.
    pub fn connect(&mut self) {
        if self.status.is_connected() {
            tracing::debug!("Already connected");
            return;
        }
        if self.opening {
            tracing::debug!("Connection already being opened");
            return;
        }
        self.identity.connect();
    }

    /// Close the connection. Completion is reported as
    /// [`SessionEvent::Disconnected`].
    pub fn drop_connection(&self) {
        if !self.network.drop_connection() {
            tracing::debug!("Network context already stopped");
        }
    }

    #[must_use]
    pub const fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    pub fn add_observer(&mut self, observer: RelaySender<ConnectionEvent>) {
        self.status.add_observer(observer);
    }

    pub fn remove_observer(&mut self, observer: &RelaySender<ConnectionEvent>) -> bool {
        self.status.remove_observer(observer)
    }

    #[must_use]
    pub const fn identity(&self) -> &IdentitySource {
        &self.identity
    }

    /// Drive the session: handle token replies, assignment outcomes and
    /// network events that arrived since the last call.
    pub fn process_pending(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        for event in self.identity.process_pending() {
            match event {
                IdentityEvent::Token { token, .. } => {
                    if self.opening {
                        tracing::debug!("Ignoring token, connection already being opened");
                    } else {
                        self.opening = true;
                        self.fetcher.fetch(&token);
                    }
                }
                IdentityEvent::Failed(error) => {
                    events.push(SessionEvent::AuthenticationFailed(error));
                }
            }
        }

        for outcome in self.fetcher.process_pending() {
            match outcome.assignment {
                Some(assignment) if outcome.result.is_ok() => {
                    tracing::info!(
                        transport = %assignment.transport,
                        endpoint = %assignment.endpoint,
                        "Engine assigned"
                    );
                    if !self.network.connect_with_assignment(assignment) {
                        tracing::error!("Network context stopped, cannot connect");
                        self.opening = false;
                    }
                }
                _ => {
                    let result = if outcome.result.is_ok() {
                        AssignmentResult::BadResponse
                    } else {
                        outcome.result
                    };
                    tracing::error!("Assignment failed: {result}");
                    self.opening = false;
                    events.push(SessionEvent::AssignmentFailed(result));
                }
            }
        }

        for event in self.network_events.drain() {
            match event {
                NetworkEvent::Connected(endpoint) => {
                    self.opening = false;
                    self.status.on_connected(endpoint);
                    events.push(SessionEvent::Connected(endpoint));
                }
                NetworkEvent::Disconnected(reason) => {
                    self.opening = false;
                    self.status.on_disconnected(reason);
                    events.push(SessionEvent::Disconnected(reason));
                }
                NetworkEvent::Envelope(envelope) => events.push(SessionEvent::Inbound(envelope)),
            }
        }

        events
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("identity", &self.identity)
            .field("status", &self.status)
            .field("opening", &self.opening)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc, time::Duration};

    use thin_client_core::{
        Payload,
        envelope::ProtocolControlMessage,
        features::navigation::{NavigationMessage, NavigationState},
    };
    use thin_client_transport::{ChannelTransportFactory, TransportKind, channel::AcceptedEngine};
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::{
        assignment::{AssignmentOutcome, tests::FixedAssigner},
        config::EngineOverride,
        identity::tests::ScriptedBackend,
    };

    struct Harness {
        session: ConnectionSession,
        accepted: UnboundedReceiver<AcceptedEngine>,
        factory: ChannelTransportFactory,
        backend: ScriptedBackend,
        _outbound: RelaySender<Envelope>,
    }

    fn harness(config: &SessionConfig, backend: ScriptedBackend, outcome: AssignmentOutcome) -> Harness {
        let (factory, accepted) = ChannelTransportFactory::new();
        let assigner = FixedAssigner {
            outcome,
            requests: Rc::new(RefCell::new(Vec::new())),
        };
        let parts = ConnectionSession::build(
            config,
            Box::new(backend.clone()),
            Box::new(assigner),
            Arc::new(factory.clone()),
        );
        tokio::spawn(parts.network.run());
        Harness {
            session: parts.session,
            accepted,
            factory,
            backend,
            _outbound: parts.outbound,
        }
    }

    fn override_config() -> SessionConfig {
        SessionConfig::default().with_engine_override(EngineOverride {
            endpoint: "127.0.0.1:11000".parse().unwrap(),
            transport: TransportKind::Tcp,
            client_token: "dev-token".to_string(),
            certificate_path: None,
        })
    }

    async fn pump(session: &mut ConnectionSession) -> Vec<SessionEvent> {
        for _ in 0..400 {
            let events = session.process_pending();
            if !events.is_empty() {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session produced no event");
    }

    #[tokio::test]
    async fn test_connect_reaches_engine() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );

        h.session.connect();
        let events = pump(&mut h.session).await;

        assert!(matches!(events.as_slice(), [SessionEvent::Connected(_)]));
        assert!(h.session.status().is_connected());

        let mut accepted = h.accepted.recv().await.unwrap();
        let start = accepted.engine.recv().await.unwrap();
        assert!(matches!(
            start.payload(),
            Payload::ProtocolControl(ProtocolControlMessage::StartConnection { client_token, .. })
                if client_token == "dev-token"
        ));
    }

    #[tokio::test]
    async fn test_connect_while_connected_is_noop() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );
        h.session.connect();
        pump(&mut h.session).await;

        h.session.connect();
        assert_eq!(h.backend.requests(), 1);
        assert_eq!(h.factory.transports_created(), 1);
    }

    #[tokio::test]
    async fn test_connect_while_opening_is_noop() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );
        let (observer, mut observed) = relay();
        h.session.add_observer(observer);

        // Token and override assignment are handled here; the network
        // context has not reported back yet.
        h.session.connect();
        assert!(h.session.process_pending().is_empty());
        h.session.connect();

        let events = pump(&mut h.session).await;
        assert!(matches!(events.as_slice(), [SessionEvent::Connected(_)]));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.session.process_pending().is_empty());
        assert_eq!(h.backend.requests(), 1);
        assert_eq!(h.factory.transports_created(), 1);
        assert_eq!(observed.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_after_disconnect_opens_again() {
        let backend = ScriptedBackend::signed_in([Ok("a".to_string()), Ok("b".to_string())]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );
        h.session.connect();
        pump(&mut h.session).await;
        h.session.drop_connection();
        pump(&mut h.session).await;

        h.session.connect();
        let events = pump(&mut h.session).await;

        assert!(matches!(events.as_slice(), [SessionEvent::Connected(_)]));
        assert_eq!(h.backend.requests(), 2);
        assert_eq!(h.factory.transports_created(), 2);
    }

    #[tokio::test]
    async fn test_authentication_failure_is_surfaced() {
        let backend = ScriptedBackend::signed_in([Err(TokenError::InvalidCredential(
            "revoked".to_string(),
        ))]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );

        h.session.connect();
        let events = pump(&mut h.session).await;

        assert!(matches!(
            events.as_slice(),
            [SessionEvent::AuthenticationFailed(TokenError::InvalidCredential(_))]
        ));
        assert_eq!(h.factory.transports_created(), 0);
    }

    #[tokio::test]
    async fn test_handshake_uses_configured_protocol_version() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &override_config().with_protocol_version(4),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );
        h.session.connect();
        pump(&mut h.session).await;

        let mut accepted = h.accepted.recv().await.unwrap();
        let start = accepted.engine.recv().await.unwrap();
        assert!(matches!(
            start.payload(),
            Payload::ProtocolControl(ProtocolControlMessage::StartConnection {
                protocol_version: 4,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_assignment_failure_is_surfaced() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &SessionConfig::default(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::OutOfVms),
        );

        h.session.connect();
        let events = pump(&mut h.session).await;

        assert_eq!(
            events,
            vec![SessionEvent::AssignmentFailed(AssignmentResult::OutOfVms)]
        );
        assert_eq!(h.factory.transports_created(), 0);
    }

    #[tokio::test]
    async fn test_inbound_envelopes_and_disconnect() {
        let backend = ScriptedBackend::signed_in([Ok("access".to_string())]);
        let mut h = harness(
            &override_config(),
            backend,
            AssignmentOutcome::failed(AssignmentResult::ServerError),
        );
        let (observer, mut observed) = relay();
        h.session.add_observer(observer);

        h.session.connect();
        pump(&mut h.session).await;
        let accepted = h.accepted.recv().await.unwrap();

        let inbound = Envelope::new(
            1,
            Payload::Navigation(NavigationMessage::StateChanged(NavigationState {
                title: Some("Home".to_string()),
                ..NavigationState::default()
            })),
        );
        accepted.engine.send(&inbound).unwrap();
        assert_eq!(pump(&mut h.session).await, vec![SessionEvent::Inbound(inbound)]);

        h.session.drop_connection();
        assert_eq!(
            pump(&mut h.session).await,
            vec![SessionEvent::Disconnected(DisconnectReason::ABORTED)]
        );
        assert!(!h.session.status().is_connected());

        let notifications = observed.drain();
        assert_eq!(notifications.len(), 2);
        assert_eq!(
            notifications[1],
            ConnectionEvent::Disconnected(DisconnectReason::ABORTED)
        );
    }
}
