//! Protocol transport abstractions.
//!
//! The wire protocol of the messaging network is an external black box.
//! These traits are the seam: a `Transport` opens sockets seeded with
//! credential state, and each socket reports its lifecycle through an
//! ordered event stream. `MockTransport` implements the same seam for
//! tests.

use crate::transport::message::RawMessage;
use crate::vault::AuthState;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Why the transport closed a socket. Raw shape, translated exactly once
/// by [`classify_close`](crate::transport::classify_close); nothing past
/// that boundary inspects codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: Option<u16>,
    pub message: String,
}

impl CloseReason {
    pub fn new(code: impl Into<Option<u16>>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Events a live socket emits, delivered in transport order for a given
/// session. `Closed` is always the final event on a stream.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A pairing QR payload was issued (unauthenticated sessions only).
    Qr(String),

    /// The connection is open and authenticated as `jid`.
    Open { jid: String },

    /// Credential or key material changed; the full snapshot to persist.
    AuthUpdated(AuthState),

    /// An inbound message arrived.
    Message(RawMessage),

    /// The socket closed. No further events follow.
    Closed(CloseReason),
}

/// An open protocol socket.
#[async_trait]
pub trait TransportSocket: Send + Sync + 'static {
    /// Deliver an already-built outbound payload; returns the network
    /// message id.
    async fn send(&self, payload: crate::transport::OutboundPayload) -> TransportResult<String>;

    /// Protocol-level logout, invalidating the credential set upstream.
    async fn logout(&self) -> TransportResult<()>;

    /// Tear down the underlying connection. Idempotent.
    async fn close(&self);
}

/// Factory for protocol sockets.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Socket: TransportSocket;

    /// Open a socket for `session_id`, seeded with `auth`. Returns the
    /// socket and the receiver carrying its ordered event stream.
    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
    ) -> TransportResult<(Self::Socket, mpsc::Receiver<TransportEvent>)>;
}
