//! Protocol transport boundary.
//!
//! The actual wire protocol is an external client library; everything here
//! is the seam the connection manager talks through: the socket/event
//! traits, the single close-cause translation point, message payload
//! shapes, and a scriptable mock.

pub mod classify;
pub mod message;
pub mod mock;
pub mod traits;

pub use classify::{classify_close, CloseClass};
pub use message::{
    build_payload, normalize_inbound, phone_from_jid, InboundMessage, MediaContent, MessageKey,
    MessageKind, OutboundPayload, RawContent, RawMessage, SendMessageRequest,
};
pub use mock::{MockCall, MockSocket, MockTransport};
pub use traits::{
    CloseReason, Transport, TransportError, TransportEvent, TransportResult, TransportSocket,
};
