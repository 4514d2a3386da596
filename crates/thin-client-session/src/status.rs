//! Observable connection state.

use std::net::SocketAddr;

use thin_client_core::RelaySender;
use thin_client_transport::DisconnectReason;

/// Notification broadcast to connection observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected(SocketAddr),
    Disconnected(DisconnectReason),
}

/// Connected/disconnected state plus its observers.
///
/// Observers are relays, so each one is notified on its own context.
/// Observers whose context is gone are pruned on the next broadcast.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    endpoint: Option<SocketAddr>,
    last_disconnect: Option<DisconnectReason>,
    observers: Vec<RelaySender<ConnectionEvent>>,
}

impl ConnectionStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.endpoint.is_some()
    }

    #[must_use]
    pub const fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    #[must_use]
    pub const fn last_disconnect(&self) -> Option<DisconnectReason> {
        self.last_disconnect
    }

    pub fn add_observer(&mut self, observer: RelaySender<ConnectionEvent>) {
        self.observers.push(observer);
    }

    /// Returns whether the observer was registered.
    pub fn remove_observer(&mut self, observer: &RelaySender<ConnectionEvent>) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !o.same_destination(observer));
        self.observers.len() != before
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn on_connected(&mut self, endpoint: SocketAddr) {
        self.endpoint = Some(endpoint);
        self.last_disconnect = None;
        self.broadcast(ConnectionEvent::Connected(endpoint));
    }

    pub fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.endpoint = None;
        self.last_disconnect = Some(reason);
        if reason.is_remote_initiated() {
            tracing::info!(%reason, "Engine ended the session");
        } else {
            tracing::warn!(%reason, "Connection lost");
        }
        self.broadcast(ConnectionEvent::Disconnected(reason));
    }

    fn broadcast(&mut self, event: ConnectionEvent) {
        self.observers.retain(|observer| {
            let alive = observer.post(event);
            if !alive {
                tracing::debug!("Pruning connection observer whose context is gone");
            }
            alive
        });
    }
}
