//! Transport contract between the session manager and a socket implementation.
//!
//! A [`TransportFactory`] opens one [`Transport`] per connection attempt and
//! reports lifecycle events through the [`TransportEvents`] sink it is
//! handed. The manager owns every transport; callers never see one.

use std::sync::Arc;

use ember_core::{AuthToken, SocketId, TransportError, TransportFault};
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::mpsc;

/// A live bidirectional message channel.
pub trait Transport: Send + Sync {
    /// Send `payload` under `event`. Never blocks; a full queue is an error.
    fn emit(&self, event: &str, payload: &Value) -> Result<(), TransportError>;
    /// Start forwarding inbound `event` messages to the sink.
    fn listen(&self, event: &str);
    /// Stop forwarding inbound `event` messages.
    fn unlisten(&self, event: &str);
    /// Client-initiated close. Idempotent; never reported as a server close.
    fn close(&self);
}

/// Opens transports.
pub trait TransportFactory: Send + Sync {
    /// Start connecting. Returns as soon as the transport object exists; the
    /// handshake result arrives later through `events`.
    fn open(
        &self,
        request: ConnectRequest,
        events: TransportEvents,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Everything a factory needs to open one transport.
#[derive(Clone, Debug)]
pub struct ConnectRequest {
    /// Endpoint URL. Never carries credentials.
    pub url: String,
    /// Sent as the first frame after the socket opens.
    pub handshake: HandshakePayload,
    /// Outbound queue depth.
    pub send_queue: usize,
}

/// `{ "auth": { "token": ... } }`
#[derive(Clone, Debug, Serialize)]
pub struct HandshakePayload {
    /// Credentials block.
    pub auth: HandshakeAuth,
}

/// Credentials sent in the handshake.
#[derive(Clone, Debug, Serialize)]
pub struct HandshakeAuth {
    /// Bearer token (redacted in `Debug`).
    #[serde(serialize_with = "expose_token")]
    pub token: AuthToken,
}

impl HandshakePayload {
    /// Payload carrying `token`.
    pub fn new(token: AuthToken) -> Self {
        Self {
            auth: HandshakeAuth { token },
        }
    }
}

fn expose_token<S: Serializer>(token: &AuthToken, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(token.expose())
}

/// Why a transport closed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// [`Transport::close`] was called.
    ClientInitiated,
    /// The server closed the socket.
    ServerInitiated,
    /// The socket failed (connect error, read error, reset).
    Network(String),
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientInitiated => "client",
            Self::ServerInitiated => "server",
            Self::Network(_) => "network",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network: {msg}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One lifecycle event reported by a transport.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// Handshake accepted.
    Connected(SocketId),
    /// A listened-for inbound event.
    Message {
        /// Event name.
        event: String,
        /// Event payload.
        payload: Value,
    },
    /// The transport is gone.
    Closed(CloseReason),
    /// The server (or transport) reported an error.
    Fault(TransportFault),
}

/// Event sink handed to a factory, tagged with the transport's generation.
///
/// Sends never block and are dropped silently once the manager is gone.
#[derive(Clone, Debug)]
pub struct TransportEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEvents {
    /// A sink for `generation` and the receiver that drains it.
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { generation, tx }, rx)
    }

    /// Generation of the transport this sink belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Handshake accepted by the server.
    pub fn connected(&self, socket_id: SocketId) {
        self.send(TransportEvent::Connected(socket_id));
    }

    /// Inbound event.
    pub fn message(&self, event: impl Into<String>, payload: Value) {
        self.send(TransportEvent::Message {
            event: event.into(),
            payload,
        });
    }

    /// Transport closed.
    pub fn closed(&self, reason: CloseReason) {
        self.send(TransportEvent::Closed(reason));
    }

    /// Error reported on the socket.
    pub fn fault(&self, fault: TransportFault) {
        self.send(TransportEvent::Fault(fault));
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.tx.send(event);
    }
}
