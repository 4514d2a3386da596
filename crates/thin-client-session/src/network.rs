//! Network context: owns the transport for one session.
//!
//! [`ClientNetworkComponents`] runs as a tokio task. The main context talks to
//! it through a [`NetworkHandle`] and the outbound envelope relay, and hears
//! back through [`NetworkEvent`]s. Nothing here reconnects on its own.

use std::{net::SocketAddr, sync::Arc};

use thin_client_core::{
    Envelope, FeatureTag, Payload, RelayReceiver, RelaySender,
    envelope::ProtocolControlMessage,
};
use thin_client_transport::{
    Connection, ConnectionError, DisconnectReason, Transport, TransportFactory, TransportKind,
};
use tokio::sync::mpsc;

use crate::assignment::{Assignment, InvalidAssignment};

/// Event posted from the network context to the main context.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    Connected(SocketAddr),
    Disconnected(DisconnectReason),
    Envelope(Envelope),
}

#[derive(Debug)]
enum NetworkCommand {
    ConnectWithAssignment(Assignment),
    DropConnection,
}

/// Main-context handle to the network context.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    commands: mpsc::UnboundedSender<NetworkCommand>,
}

impl NetworkHandle {
    /// Ask the network context to open a transport for `assignment`.
    ///
    /// Returns `false` if the network context has stopped.
    pub fn connect_with_assignment(&self, assignment: Assignment) -> bool {
        self.commands
            .send(NetworkCommand::ConnectWithAssignment(assignment))
            .is_ok()
    }

    /// Close the current connection. Completion shows up as
    /// [`NetworkEvent::Disconnected`] with [`DisconnectReason::ABORTED`].
    pub fn drop_connection(&self) -> bool {
        self.commands.send(NetworkCommand::DropConnection).is_ok()
    }
}

enum Step {
    Command(Option<NetworkCommand>),
    Inbound(Result<Envelope, ConnectionError>),
    Outbound(Option<Envelope>),
}

/// Owns the transport lifecycle.
pub struct ClientNetworkComponents {
    factory: Arc<dyn TransportFactory>,
    protocol_version: u32,
    events: RelaySender<NetworkEvent>,
    outbound: RelayReceiver<Envelope>,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    connection: Option<Box<dyn Connection>>,
    endpoint: Option<SocketAddr>,
}

impl ClientNetworkComponents {
    /// Create the network context.
    ///
    /// `protocol_version` is announced in the start-connection handshake.
    /// `outbound` is the receiving end of the feature routers' sink.
    #[must_use]
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        protocol_version: u32,
        events: RelaySender<NetworkEvent>,
        outbound: RelayReceiver<Envelope>,
    ) -> (Self, NetworkHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        (
            Self {
                factory,
                protocol_version,
                events,
                outbound,
                commands,
                connection: None,
                endpoint: None,
            },
            NetworkHandle {
                commands: commands_tx,
            },
        )
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Open a transport for `assignment` and authenticate with its token.
    ///
    /// Reports the result as a [`NetworkEvent`]. An invalid assignment is
    /// refused before any transport is built.
    pub async fn connect_with_assignment(&mut self, assignment: Assignment) {
        if self.connection.is_some() {
            tracing::info!("Replacing the current connection");
            self.disconnect(DisconnectReason::ABORTED).await;
        }

        let transport = match self.select_transport(&assignment) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(endpoint = %assignment.endpoint, "Refusing assignment: {e}");
                self.post(NetworkEvent::Disconnected(
                    DisconnectReason::INVALID_ARGUMENT,
                ));
                return;
            }
        };

        tracing::info!(
            transport = transport.name(),
            endpoint = %assignment.endpoint,
            "Opening transport"
        );

        let mut connection = match transport.connect().await {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(endpoint = %assignment.endpoint, "Failed to connect: {e}");
                self.post(NetworkEvent::Disconnected(e.disconnect_reason()));
                return;
            }
        };

        let start = Envelope::protocol_control(ProtocolControlMessage::StartConnection {
            client_token: assignment.client_token,
            protocol_version: self.protocol_version,
        });
        if let Err(e) = connection.send(start).await {
            tracing::warn!(endpoint = %assignment.endpoint, "Handshake failed: {e}");
            connection.close().await;
            self.post(NetworkEvent::Disconnected(e.disconnect_reason()));
            return;
        }

        // Anything posted before the main context hears about this connection
        // was addressed to no engine; tabs are announced again on `Connected`.
        self.outbound.invalidate();
        self.connection = Some(connection);
        self.endpoint = Some(assignment.endpoint);
        tracing::info!(endpoint = %assignment.endpoint, "Connected");
        self.post(NetworkEvent::Connected(assignment.endpoint));
    }

    /// Serve commands, inbound frames and outbound envelopes until the main
    /// context goes away.
    pub async fn run(mut self) {
        loop {
            let step = if let Some(connection) = self.connection.as_mut() {
                tokio::select! {
                    command = self.commands.recv() => Step::Command(command),
                    inbound = connection.recv() => Step::Inbound(inbound),
                    envelope = self.outbound.next() => Step::Outbound(envelope),
                }
            } else {
                Step::Command(self.commands.recv().await)
            };

            match step {
                Step::Command(Some(NetworkCommand::ConnectWithAssignment(assignment))) => {
                    self.connect_with_assignment(assignment).await;
                }
                Step::Command(Some(NetworkCommand::DropConnection)) => {
                    if self.connection.is_some() {
                        tracing::info!("Dropping connection");
                        self.disconnect(DisconnectReason::ABORTED).await;
                    } else {
                        tracing::debug!("Drop requested while not connected");
                    }
                }
                Step::Inbound(Ok(envelope)) => self.on_inbound(envelope).await,
                Step::Inbound(Err(e)) => {
                    tracing::warn!("Connection lost: {e}");
                    self.disconnect(e.disconnect_reason()).await;
                }
                Step::Outbound(Some(envelope)) => self.on_outbound(envelope).await,
                Step::Command(None) | Step::Outbound(None) => break,
            }
        }

        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        tracing::debug!("Network context stopped");
    }

    fn select_transport(
        &self,
        assignment: &Assignment,
    ) -> Result<Box<dyn Transport>, InvalidAssignment> {
        assignment.validate()?;
        match (assignment.transport, &assignment.certificate) {
            (TransportKind::Tcp, _) => Ok(self.factory.tcp(assignment.endpoint)),
            (TransportKind::Ssl, Some(certificate)) => Ok(self
                .factory
                .ssl(assignment.endpoint, certificate.clone())),
            (kind @ TransportKind::Ssl, None) => Err(InvalidAssignment::MissingCertificate(kind)),
            (kind @ TransportKind::Grpc, _) => Err(InvalidAssignment::UnsupportedTransport(kind)),
        }
    }

    async fn on_inbound(&mut self, envelope: Envelope) {
        if envelope.feature_tag() != FeatureTag::ProtocolControl {
            self.post(NetworkEvent::Envelope(envelope));
            return;
        }

        match envelope.into_payload() {
            Payload::ProtocolControl(ProtocolControlMessage::EndConnection { reason }) => {
                tracing::info!(reason, "Engine ended the connection");
                self.disconnect(DisconnectReason::new(i32::from(reason)))
                    .await;
            }
            other => {
                tracing::warn!(payload = ?other, "Ignoring unexpected protocol control message");
            }
        }
    }

    async fn on_outbound(&mut self, envelope: Envelope) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if let Err(e) = connection.send(envelope).await {
            tracing::warn!("Send failed: {e}");
            self.disconnect(e.disconnect_reason()).await;
        }
    }

    async fn disconnect(&mut self, reason: DisconnectReason) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        let endpoint = self.endpoint.take();
        // Envelopes queued for the old connection are meaningless on the next one.
        self.outbound.invalidate();
        tracing::info!(?endpoint, %reason, "Disconnected");
        self.post(NetworkEvent::Disconnected(reason));
    }

    fn post(&self, event: NetworkEvent) {
        if !self.events.post(event) {
            tracing::debug!("Main context is gone, dropping network event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use thin_client_core::{PROTOCOL_VERSION, features::navigation::NavigationMessage, relay};
    use thin_client_transport::{Certificate, ChannelTransportFactory, channel::AcceptedEngine};
    use tokio::{sync::mpsc::UnboundedReceiver, time::timeout};

    use super::*;

    struct Harness {
        handle: NetworkHandle,
        events: RelayReceiver<NetworkEvent>,
        outbound: RelaySender<Envelope>,
        accepted: UnboundedReceiver<AcceptedEngine>,
        factory: ChannelTransportFactory,
    }

    fn spawn_network() -> Harness {
        spawn_network_with_version(PROTOCOL_VERSION)
    }

    fn spawn_network_with_version(protocol_version: u32) -> Harness {
        let (factory, accepted) = ChannelTransportFactory::new();
        let (events_tx, events) = relay();
        let (outbound, outbound_rx) = relay();
        let (network, handle) = ClientNetworkComponents::new(
            Arc::new(factory.clone()),
            protocol_version,
            events_tx,
            outbound_rx,
        );
        tokio::spawn(network.run());
        Harness {
            handle,
            events,
            outbound,
            accepted,
            factory,
        }
    }

    fn tcp_assignment() -> Assignment {
        Assignment {
            transport: TransportKind::Tcp,
            endpoint: "127.0.0.1:11000".parse().unwrap(),
            client_token: "client-token".to_string(),
            certificate: None,
        }
    }

    async fn next_event(events: &mut RelayReceiver<NetworkEvent>) -> NetworkEvent {
        timeout(Duration::from_secs(5), events.next())
            .await
            .unwrap()
            .unwrap()
    }

    async fn connect(harness: &mut Harness) -> AcceptedEngine {
        assert!(harness.handle.connect_with_assignment(tcp_assignment()));
        let accepted = harness.accepted.recv().await.unwrap();
        assert_eq!(
            next_event(&mut harness.events).await,
            NetworkEvent::Connected(tcp_assignment().endpoint)
        );
        accepted
    }

    #[tokio::test]
    async fn test_ssl_without_certificate_rejected_before_opening() {
        let mut harness = spawn_network();
        let assignment = Assignment {
            transport: TransportKind::Ssl,
            certificate: None,
            ..tcp_assignment()
        };

        harness.handle.connect_with_assignment(assignment);

        assert_eq!(
            next_event(&mut harness.events).await,
            NetworkEvent::Disconnected(DisconnectReason::INVALID_ARGUMENT)
        );
        assert_eq!(harness.factory.transports_created(), 0);
        assert_eq!(harness.factory.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_ssl_with_certificate_uses_ssl_transport() {
        let mut harness = spawn_network();
        let certificate =
            Certificate::from_pem(b"-----BEGIN CERTIFICATE-----\n".to_vec()).unwrap();
        let assignment = Assignment {
            transport: TransportKind::Ssl,
            certificate: Some(certificate.clone()),
            ..tcp_assignment()
        };

        harness.handle.connect_with_assignment(assignment);
        let accepted = harness.accepted.recv().await.unwrap();

        assert_eq!(accepted.kind, TransportKind::Ssl);
        assert_eq!(accepted.certificate, Some(certificate));
    }

    #[tokio::test]
    async fn test_handshake_carries_client_token() {
        let mut harness = spawn_network();
        let mut accepted = connect(&mut harness).await;

        let start = accepted.engine.recv().await.unwrap();
        assert_eq!(
            start.payload(),
            &Payload::ProtocolControl(ProtocolControlMessage::StartConnection {
                client_token: "client-token".to_string(),
                protocol_version: PROTOCOL_VERSION,
            })
        );
    }

    #[tokio::test]
    async fn test_handshake_announces_configured_version() {
        let mut harness = spawn_network_with_version(9);
        let mut accepted = connect(&mut harness).await;

        let start = accepted.engine.recv().await.unwrap();
        assert!(matches!(
            start.payload(),
            Payload::ProtocolControl(ProtocolControlMessage::StartConnection {
                protocol_version: 9,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_envelopes_posted_before_connect_are_discarded() {
        let mut harness = spawn_network();
        harness
            .outbound
            .post(Envelope::new(1, Payload::Navigation(NavigationMessage::GoBack)));

        let mut accepted = connect(&mut harness).await;
        let _start = accepted.engine.recv().await.unwrap();

        let reload = Envelope::new(1, Payload::Navigation(NavigationMessage::Reload));
        harness.outbound.post(reload.clone());
        assert_eq!(accepted.engine.recv().await, Some(reload));
    }

    #[tokio::test]
    async fn test_envelopes_flow_both_ways() {
        let mut harness = spawn_network();
        let mut accepted = connect(&mut harness).await;
        let _start = accepted.engine.recv().await.unwrap();

        let outbound = Envelope::new(3, Payload::Navigation(NavigationMessage::Reload));
        harness.outbound.post(outbound.clone());
        assert_eq!(accepted.engine.recv().await, Some(outbound));

        let inbound = Envelope::new(3, Payload::Navigation(NavigationMessage::GoBack));
        accepted.engine.send(&inbound).unwrap();
        assert_eq!(
            next_event(&mut harness.events).await,
            NetworkEvent::Envelope(inbound)
        );
    }

    #[tokio::test]
    async fn test_end_connection_is_remote_disconnect() {
        let mut harness = spawn_network();
        let accepted = connect(&mut harness).await;

        accepted
            .engine
            .send(&Envelope::protocol_control(
                ProtocolControlMessage::EndConnection { reason: 5 },
            ))
            .unwrap();

        let NetworkEvent::Disconnected(reason) = next_event(&mut harness.events).await else {
            panic!("expected a disconnect");
        };
        assert_eq!(reason.code(), 5);
        assert!(reason.is_remote_initiated());
    }

    #[tokio::test]
    async fn test_drop_connection_reports_aborted() {
        let mut harness = spawn_network();
        let _accepted = connect(&mut harness).await;

        harness.handle.drop_connection();

        assert_eq!(
            next_event(&mut harness.events).await,
            NetworkEvent::Disconnected(DisconnectReason::ABORTED)
        );
    }

    #[tokio::test]
    async fn test_engine_loss_is_network_error() {
        let mut harness = spawn_network();
        let accepted = connect(&mut harness).await;
        drop(accepted);

        let NetworkEvent::Disconnected(reason) = next_event(&mut harness.events).await else {
            panic!("expected a disconnect");
        };
        assert!(reason.is_network_error());
    }

    #[tokio::test]
    async fn test_refused_connect_reports_reason() {
        let mut harness = spawn_network();
        harness.accepted.close();

        harness.handle.connect_with_assignment(tcp_assignment());

        assert_eq!(
            next_event(&mut harness.events).await,
            NetworkEvent::Disconnected(DisconnectReason::CONNECTION_REFUSED)
        );
    }
}
