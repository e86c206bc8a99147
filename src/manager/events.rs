//! Normalized lifecycle/message events.
//!
//! A closed set of typed variants over a broadcast bus, rather than a
//! string-keyed emitter: consumers subscribe once at construction and
//! match on the enum. Serialized names follow the external notifier
//! contract (`session-qr`, `session-connected`, ...).

use crate::transport::InboundMessage;
use serde::Serialize;
use tokio::sync::broadcast;

/// One normalized event on the outbound stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum SessionEvent {
    #[serde(rename = "session-qr")]
    Qr {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "qrCode")]
        qr_code: String,
    },

    #[serde(rename = "session-connected")]
    Connected {
        #[serde(rename = "sessionId")]
        session_id: String,
        #[serde(rename = "phoneNumber")]
        phone_number: String,
    },

    #[serde(rename = "session-disconnected")]
    Disconnected {
        #[serde(rename = "sessionId")]
        session_id: String,
        reason: String,
    },

    #[serde(rename = "message-received")]
    Message(InboundMessage),
}

impl SessionEvent {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Qr { .. } => "session-qr",
            SessionEvent::Connected { .. } => "session-connected",
            SessionEvent::Disconnected { .. } => "session-disconnected",
            SessionEvent::Message(_) => "message-received",
        }
    }

    /// The session this event belongs to.
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Qr { session_id, .. }
            | SessionEvent::Connected { session_id, .. }
            | SessionEvent::Disconnected { session_id, .. } => session_id,
            SessionEvent::Message(msg) => &msg.session_id,
        }
    }
}

/// Broadcast bus for [`SessionEvent`]s.
///
/// Emission never blocks; with no subscribers events are dropped, which is
/// the desired behavior for an optional notifier.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
