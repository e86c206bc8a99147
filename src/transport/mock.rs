//! Mock transport for tests.
//!
//! Scriptable: each `connect` pops the next scripted event batch for that
//! session and delivers it on the socket's event channel; tests can also
//! push events into a live socket afterwards. Every transport call is
//! recorded in order so tests can assert teardown/setup sequencing.

use super::message::RawMessage;
use super::traits::{
    CloseReason, Transport, TransportError, TransportEvent, TransportResult, TransportSocket,
};
use super::OutboundPayload;
use crate::vault::AuthState;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect(String),
    Send(String, OutboundPayload),
    Logout(String),
    Close(String),
}

#[derive(Default)]
struct MockTransportState {
    scripts: HashMap<String, VecDeque<Vec<TransportEvent>>>,
    fail_connects: HashMap<String, u32>,
    live: HashMap<String, mpsc::Sender<TransportEvent>>,
    log: Vec<MockCall>,
    connect_counts: HashMap<String, u32>,
    last_auth_registered: HashMap<String, bool>,
    next_message_id: u64,
}

/// Scriptable in-memory `Transport`.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockTransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a batch of events to be delivered by the next `connect` for
    /// `session_id`. Batches are consumed in order, one per connect.
    pub fn script_events(&self, session_id: &str, events: Vec<TransportEvent>) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .entry(session_id.to_string())
            .or_default()
            .push_back(events);
    }

    /// Make the next `n` connect attempts for `session_id` fail.
    pub fn fail_next_connects(&self, session_id: &str, n: u32) {
        self.state
            .lock()
            .unwrap()
            .fail_connects
            .insert(session_id.to_string(), n);
    }

    /// Deliver an event into the currently live socket for `session_id`.
    pub fn push_event(&self, session_id: &str, event: TransportEvent) -> bool {
        let sender = self
            .state
            .lock()
            .unwrap()
            .live
            .get(session_id)
            .cloned();
        match sender {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Convenience: deliver a raw inbound message.
    pub fn push_message(&self, session_id: &str, raw: RawMessage) -> bool {
        self.push_event(session_id, TransportEvent::Message(raw))
    }

    /// Convenience: close the live socket with `reason`.
    pub fn push_close(&self, session_id: &str, reason: CloseReason) -> bool {
        self.push_event(session_id, TransportEvent::Closed(reason))
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().log.clone()
    }

    /// How many times `connect` ran for `session_id`.
    pub fn connect_count(&self, session_id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .connect_counts
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Whether the most recent connect for `session_id` was seeded with
    /// registered credentials (i.e. could resume without a QR).
    pub fn last_connect_was_registered(&self, session_id: &str) -> Option<bool> {
        self.state
            .lock()
            .unwrap()
            .last_auth_registered
            .get(session_id)
            .copied()
    }
}

/// Socket handed out by [`MockTransport`].
pub struct MockSocket {
    session_id: String,
    state: Arc<Mutex<MockTransportState>>,
}

#[async_trait]
impl TransportSocket for MockSocket {
    async fn send(&self, payload: OutboundPayload) -> TransportResult<String> {
        let mut state = self.state.lock().unwrap();
        state
            .log
            .push(MockCall::Send(self.session_id.clone(), payload));
        state.next_message_id += 1;
        Ok(format!("MOCK-{}", state.next_message_id))
    }

    async fn logout(&self) -> TransportResult<()> {
        self.state
            .lock()
            .unwrap()
            .log
            .push(MockCall::Logout(self.session_id.clone()));
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.log.push(MockCall::Close(self.session_id.clone()));
        state.live.remove(&self.session_id);
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Socket = MockSocket;

    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
    ) -> TransportResult<(Self::Socket, mpsc::Receiver<TransportEvent>)> {
        let mut state = self.state.lock().unwrap();
        *state
            .connect_counts
            .entry(session_id.to_string())
            .or_default() += 1;
        state
            .last_auth_registered
            .insert(session_id.to_string(), auth.is_registered());

        if let Some(remaining) = state.fail_connects.get_mut(session_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Network("scripted connect failure".to_string()));
            }
        }

        state.log.push(MockCall::Connect(session_id.to_string()));

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        if let Some(batch) = state
            .scripts
            .get_mut(session_id)
            .and_then(VecDeque::pop_front)
        {
            for event in batch {
                // Capacity is ample for scripted batches.
                let _ = tx.try_send(event);
            }
        }
        state.live.insert(session_id.to_string(), tx);

        Ok((
            MockSocket {
                session_id: session_id.to_string(),
                state: Arc::clone(&self.state),
            },
            rx,
        ))
    }
}
