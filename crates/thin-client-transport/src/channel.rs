//! In-memory transport for tests and local demos.
//!
//! Each opened connection is a pair: the client side implements
//! [`Connection`], the engine side is an [`EngineEnd`] handed out through the
//! factory's accept channel. Frames cross the pair encoded, exactly as they
//! would cross a socket.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use thin_client_core::Envelope;
use tokio::sync::mpsc;

use crate::{
    protocol::{CodecError, decode_frame, encode_frame},
    transport::{
        Certificate, Connection, ConnectionError, DisconnectReason, Transport, TransportFactory,
        TransportKind,
    },
};

enum EngineFrame {
    Data(Bytes),
    Close(u16),
}

/// Client side of an in-memory connection.
pub struct ChannelConnection {
    to_engine: mpsc::UnboundedSender<Bytes>,
    from_engine: mpsc::UnboundedReceiver<EngineFrame>,
}

/// Engine side of an in-memory connection.
pub struct EngineEnd {
    to_client: mpsc::UnboundedSender<EngineFrame>,
    from_client: mpsc::UnboundedReceiver<Bytes>,
}

/// Create a connected client/engine pair.
#[must_use]
pub fn channel_pair() -> (ChannelConnection, EngineEnd) {
    let (to_engine, from_client) = mpsc::unbounded_channel();
    let (to_client, from_engine) = mpsc::unbounded_channel();
    (
        ChannelConnection {
            to_engine,
            from_engine,
        },
        EngineEnd {
            to_client,
            from_client,
        },
    )
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn recv(&mut self) -> Result<Envelope, ConnectionError> {
        match self.from_engine.recv().await {
            Some(EngineFrame::Data(frame)) => Ok(decode_frame(&frame)?),
            Some(EngineFrame::Close(reason)) => Err(ConnectionError::RemoteClosed(reason)),
            None => Err(ConnectionError::network(
                DisconnectReason::CONNECTION_CLOSED,
                "engine end dropped",
            )),
        }
    }

    async fn send(&mut self, envelope: Envelope) -> Result<(), ConnectionError> {
        let frame = encode_frame(&envelope)?;
        self.to_engine.send(frame).map_err(|_| {
            ConnectionError::network(DisconnectReason::CONNECTION_RESET, "engine end dropped")
        })
    }

    async fn close(&mut self) {
        self.from_engine.close();
    }
}

/// Send error on the engine side.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl EngineEnd {
    /// Send an envelope to the client.
    ///
    /// # Errors
    /// Returns error if the client side is gone or the envelope cannot be encoded.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = encode_frame(envelope)?;
        self.send_raw(frame)
    }

    /// Send an already encoded (possibly corrupt) frame.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn send_raw(&self, frame: Bytes) -> Result<(), SendError> {
        self.to_client
            .send(EngineFrame::Data(frame))
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Close the connection cleanly with a reason code.
    ///
    /// # Errors
    /// Returns error if the client side is gone.
    pub fn close(&self, reason: u16) -> Result<(), SendError> {
        self.to_client
            .send(EngineFrame::Close(reason))
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Receive the next envelope from the client. Undecodable frames are skipped.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let frame = self.from_client.recv().await?;
            match decode_frame(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!("Engine end dropping undecodable frame: {e}"),
            }
        }
    }

    /// Receive an envelope if one is already queued.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        while let Ok(frame) = self.from_client.try_recv() {
            match decode_frame(&frame) {
                Ok(envelope) => return Some(envelope),
                Err(e) => tracing::warn!("Engine end dropping undecodable frame: {e}"),
            }
        }
        None
    }
}

/// An engine end accepted by a [`ChannelTransportFactory`].
pub struct AcceptedEngine {
    pub kind: TransportKind,
    pub endpoint: SocketAddr,
    pub certificate: Option<Certificate>,
    pub engine: EngineEnd,
}

/// Transport opening one in-memory connection per `connect`.
pub struct ChannelTransport {
    kind: TransportKind,
    endpoint: SocketAddr,
    certificate: Option<Certificate>,
    accept_tx: mpsc::UnboundedSender<AcceptedEngine>,
    opened: Arc<AtomicUsize>,
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        match self.kind {
            TransportKind::Ssl => "channel-ssl",
            TransportKind::Tcp => "channel-tcp",
            TransportKind::Grpc => "channel-grpc",
        }
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let (connection, engine) = channel_pair();
        let accepted = AcceptedEngine {
            kind: self.kind,
            endpoint: self.endpoint,
            certificate: self.certificate.clone(),
            engine,
        };
        if self.accept_tx.send(accepted).is_err() {
            return Err(ConnectionError::network(
                DisconnectReason::CONNECTION_REFUSED,
                format!("nothing is accepting on {}", self.endpoint),
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(connection))
    }
}

/// Factory handing engine ends to whoever holds the accept receiver.
#[derive(Clone)]
pub struct ChannelTransportFactory {
    accept_tx: mpsc::UnboundedSender<AcceptedEngine>,
    created: Arc<AtomicUsize>,
    opened: Arc<AtomicUsize>,
}

impl ChannelTransportFactory {
    /// Create a factory and the receiver of accepted engine ends.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AcceptedEngine>) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        (
            Self {
                accept_tx,
                created: Arc::new(AtomicUsize::new(0)),
                opened: Arc::new(AtomicUsize::new(0)),
            },
            accept_rx,
        )
    }

    /// Number of transports built so far.
    #[must_use]
    pub fn transports_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Number of connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn build(
        &self,
        kind: TransportKind,
        endpoint: SocketAddr,
        certificate: Option<Certificate>,
    ) -> Box<dyn Transport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(ChannelTransport {
            kind,
            endpoint,
            certificate,
            accept_tx: self.accept_tx.clone(),
            opened: Arc::clone(&self.opened),
        })
    }
}

impl TransportFactory for ChannelTransportFactory {
    fn tcp(&self, endpoint: SocketAddr) -> Box<dyn Transport> {
        self.build(TransportKind::Tcp, endpoint, None)
    }

    fn ssl(&self, endpoint: SocketAddr, certificate: Certificate) -> Box<dyn Transport> {
        self.build(TransportKind::Ssl, endpoint, Some(certificate))
    }
}
