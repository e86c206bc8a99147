//! Connection manager.
//!
//! The orchestration core: owns the in-memory table of live protocol
//! sockets, drives the per-session state machine, schedules reconnection,
//! and emits the normalized event stream. One event pump task per socket
//! keeps same-session handling serialized while different sessions overlap
//! freely. The persisted session row is the source of truth across
//! restarts; everything in here is disposable.

pub mod backoff;
pub mod events;

pub use backoff::ReconnectBackoff;
pub use events::{EventBus, SessionEvent};

use crate::store::{SessionStatus, SessionStore, StoreError};
use crate::transport::{
    build_payload, classify_close, normalize_inbound, phone_from_jid, CloseClass, CloseReason,
    SendMessageRequest, Transport, TransportError, TransportEvent, TransportSocket,
};
use crate::vault::CredentialVault;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Manager tuning knobs. Defaults match the production values.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Delay between sequential session restores at startup.
    pub restart_stagger: Duration,

    /// Validity window for issued QR codes.
    pub qr_ttl: Duration,

    /// First reconnect delay after a transient failure.
    pub backoff_base: Duration,

    /// Upper bound for the doubling reconnect delay.
    pub backoff_cap: Duration,

    /// Fixed delay for the restart-required close path.
    pub restart_retry_delay: Duration,

    /// Quiet period for debounced credential saves.
    pub save_debounce: Duration,

    /// Event bus capacity.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            restart_stagger: Duration::from_secs(2),
            qr_ttl: Duration::from_secs(60),
            backoff_base: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(60),
            restart_retry_delay: Duration::from_secs(1),
            save_debounce: Duration::from_millis(500),
            event_capacity: 256,
        }
    }
}

/// Manager errors. Only synchronous caller-facing failures surface here;
/// everything else flows through status changes and events.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Session {0} is not connected")]
    NotConnected(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Receipt returned to `send_message` callers.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub status: String,
}

/// Per-session view in the health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    pub id: String,
    pub connected: bool,
    pub phone_number: Option<String>,
    pub messages_received: u64,
    pub messages_sent: u64,
}

/// Health snapshot of the in-memory socket table.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ready: bool,
    pub active_sessions: usize,
    pub connected_sessions: usize,
    pub sessions: Vec<SessionHealth>,
}

/// Row-level listing entry (status from the persisted row).
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub status: SessionStatus,
    pub phone_number: Option<String>,
}

struct LiveSession<K: TransportSocket> {
    socket: Arc<K>,
    pump: JoinHandle<()>,
    phone_number: Option<String>,
    messages_received: u64,
    messages_sent: u64,
}

struct Tables<K: TransportSocket> {
    sessions: HashMap<String, LiveSession<K>>,
    timers: HashMap<String, JoinHandle<()>>,
    backoff: HashMap<String, ReconnectBackoff>,
}

impl<K: TransportSocket> Default for Tables<K> {
    fn default() -> Self {
        Self {
            sessions: HashMap::new(),
            timers: HashMap::new(),
            backoff: HashMap::new(),
        }
    }
}

struct ManagerInner<T: Transport, S: SessionStore> {
    transport: T,
    store: Arc<S>,
    vault: CredentialVault<S>,
    config: ManagerConfig,
    events: EventBus,
    tables: Mutex<Tables<T::Socket>>,
}

/// Multi-session connection manager.
///
/// Cheap to clone; clones share the socket table and event bus.
pub struct ConnectionManager<T: Transport, S: SessionStore> {
    inner: Arc<ManagerInner<T, S>>,
}

impl<T: Transport, S: SessionStore> Clone for ConnectionManager<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport, S: SessionStore> ConnectionManager<T, S> {
    pub fn new(transport: T, store: Arc<S>, session_key: [u8; 32], config: ManagerConfig) -> Self {
        let vault = CredentialVault::with_quiet_period(
            Arc::clone(&store),
            session_key,
            config.save_debounce,
        );
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                store,
                vault,
                events: EventBus::new(config.event_capacity),
                config,
                tables: Mutex::new(Tables::default()),
            }),
        }
    }

    /// Subscribe to the normalized event stream. Call before starting
    /// sessions so nothing is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Startup entry point: restore every session that was connected or
    /// reconnecting before the last shutdown, one at a time with a
    /// deliberate stagger so the upstream network sees no reconnect storm.
    /// A failure restoring one session marks it `error` and the loop moves
    /// on to the others.
    pub async fn connect(&self) -> Result<(), ManagerError> {
        let rows = self.inner.store.list_restartable().await?;
        info!(count = rows.len(), "Restoring sessions from previous run");

        for (i, row) in rows.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inner.config.restart_stagger).await;
            }
            if let Err(e) = self.inner.start_session(&row.id).await {
                warn!(session_id = %row.id, error = %e, "Failed to restore session");
                let _ = self
                    .inner
                    .store
                    .update_status(&row.id, SessionStatus::Error, Some(&e.to_string()))
                    .await;
            }
        }
        Ok(())
    }

    /// Start (or restart) the session. Any live socket for the id is fully
    /// torn down first, and any pending reconnect timer is cancelled.
    pub async fn start_session(&self, id: &str) -> Result<(), ManagerError> {
        self.inner.start_session(id).await
    }

    /// Tear down the session: cancel its reconnect timer, detach handlers,
    /// optionally log out at the protocol level, close the transport.
    pub async fn stop_session(&self, id: &str, logout: bool) -> Result<(), ManagerError> {
        self.inner.stop_session(id, logout).await
    }

    /// Force a fresh QR cycle: stop with logout, clear the stored
    /// credential blob, mark the row disconnected.
    pub async fn reset_session(&self, id: &str) -> Result<(), ManagerError> {
        self.inner.stop_session(id, true).await?;
        self.inner.vault.cancel(id);
        self.inner.store.clear_credentials(id).await?;
        self.inner.store.mark_disconnected(id, None).await?;
        info!(session_id = id, "Session reset, next start will issue a QR");
        Ok(())
    }

    /// Send a message through a live session. Fails synchronously when the
    /// session has no live socket; nothing is queued or retried.
    pub async fn send_message(&self, req: SendMessageRequest) -> Result<SendReceipt, ManagerError> {
        let socket = {
            let tables = self.inner.tables.lock().unwrap();
            tables
                .sessions
                .get(&req.session_id)
                .map(|live| Arc::clone(&live.socket))
        }
        .ok_or_else(|| ManagerError::NotConnected(req.session_id.clone()))?;

        let payload = build_payload(&req)?;
        let message_id = socket.send(payload).await?;

        let mut tables = self.inner.tables.lock().unwrap();
        if let Some(live) = tables.sessions.get_mut(&req.session_id) {
            live.messages_sent += 1;
        }
        debug!(session_id = %req.session_id, message_id, "Message sent");
        Ok(SendReceipt {
            message_id,
            status: "sent".to_string(),
        })
    }

    /// Snapshot of the in-memory socket table for health callers.
    pub fn get_status(&self) -> StatusSnapshot {
        let tables = self.inner.tables.lock().unwrap();
        let mut sessions: Vec<SessionHealth> = tables
            .sessions
            .iter()
            .map(|(id, live)| SessionHealth {
                id: id.clone(),
                connected: live.phone_number.is_some(),
                phone_number: live.phone_number.clone(),
                messages_received: live.messages_received,
                messages_sent: live.messages_sent,
            })
            .collect();
        sessions.sort_by(|a, b| a.id.cmp(&b.id));

        let connected = sessions.iter().filter(|s| s.connected).count();
        StatusSnapshot {
            ready: true,
            active_sessions: sessions.len(),
            connected_sessions: connected,
            sessions,
        }
    }

    /// Row-backed listing; the persisted row is the source of truth for
    /// status.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ManagerError> {
        let rows = self.inner.store.list().await?;
        Ok(rows
            .into_iter()
            .map(|r| SessionSummary {
                id: r.id,
                status: r.status,
                phone_number: r.phone_number,
            })
            .collect())
    }

    /// Stop every tracked session (without protocol logout) and cancel
    /// every pending timer and debounced save. Afterwards both in-memory
    /// tables are empty.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = {
            let tables = self.inner.tables.lock().unwrap();
            tables.sessions.keys().cloned().collect()
        };
        for id in &ids {
            if let Err(e) = self.inner.stop_session(id, false).await {
                warn!(session_id = %id, error = %e, "Error stopping session at shutdown");
            }
        }

        let timers: Vec<JoinHandle<()>> = {
            let mut tables = self.inner.tables.lock().unwrap();
            tables.backoff.clear();
            tables.timers.drain().map(|(_, h)| h).collect()
        };
        for timer in timers {
            timer.abort();
        }
        self.inner.vault.cancel_all();
        info!(stopped = ids.len(), "Connection manager shut down");
    }

    /// Number of live sockets (diagnostics and tests).
    pub fn live_sessions(&self) -> usize {
        self.inner.tables.lock().unwrap().sessions.len()
    }

    /// Number of pending reconnect timers (diagnostics and tests).
    pub fn pending_reconnects(&self) -> usize {
        self.inner.tables.lock().unwrap().timers.len()
    }

    /// The vault, for operators embedding the manager.
    pub fn vault(&self) -> &CredentialVault<S> {
        &self.inner.vault
    }
}

impl<T: Transport, S: SessionStore> ManagerInner<T, S> {
    async fn start_session(self: &Arc<Self>, id: &str) -> Result<(), ManagerError> {
        self.cancel_timer(id);

        // Replace-logic: fully tear down any previous socket before a new
        // one exists, so at most one live socket per id at any time.
        let previous = { self.tables.lock().unwrap().sessions.remove(id) };
        if let Some(live) = previous {
            live.pump.abort();
            live.socket.close().await;
            debug!(session_id = id, "Tore down previous socket before restart");
        }
        // A stale handler may have scheduled between the two steps above.
        self.cancel_timer(id);

        let auth = self.vault.load(id).await;
        let registered = auth.is_registered();
        let (socket, events) = self.transport.connect(id, auth).await?;

        let pump = self.spawn_pump(id.to_string(), events);
        {
            let mut tables = self.tables.lock().unwrap();
            tables.sessions.insert(
                id.to_string(),
                LiveSession {
                    socket: Arc::new(socket),
                    pump,
                    phone_number: None,
                    messages_received: 0,
                    messages_sent: 0,
                },
            );
            tables.backoff.remove(id);
        }
        info!(session_id = id, registered, "Session started");
        Ok(())
    }

    async fn stop_session(self: &Arc<Self>, id: &str, logout: bool) -> Result<(), ManagerError> {
        self.cancel_timer(id);

        let existing = { self.tables.lock().unwrap().sessions.remove(id) };
        if let Some(live) = existing {
            live.pump.abort();
            if logout {
                if let Err(e) = live.socket.logout().await {
                    warn!(session_id = id, error = %e, "Protocol logout failed");
                }
            }
            live.socket.close().await;
            info!(session_id = id, logout, "Session stopped");
        }
        Ok(())
    }

    fn spawn_pump(
        self: &Arc<Self>,
        id: String,
        mut events: mpsc::Receiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let closing = matches!(event, TransportEvent::Closed(_));
                inner.handle_event(&id, event).await;
                if closing {
                    break;
                }
            }
        })
    }

    async fn handle_event(self: &Arc<Self>, id: &str, event: TransportEvent) {
        match event {
            TransportEvent::Qr(code) => {
                match self.store.set_qr_code(id, &code, self.config.qr_ttl).await {
                    Ok(()) => self.events.emit(SessionEvent::Qr {
                        session_id: id.to_string(),
                        qr_code: code,
                    }),
                    // Session stays in its prior status; no event goes out.
                    Err(e) => warn!(session_id = id, error = %e, "Failed to persist QR code"),
                }
            }
            TransportEvent::Open { jid } => {
                let phone = phone_from_jid(&jid);
                if let Err(e) = self.store.mark_connected(id, &phone).await {
                    warn!(session_id = id, error = %e, "Failed to persist connected status");
                }
                {
                    let mut tables = self.tables.lock().unwrap();
                    if let Some(live) = tables.sessions.get_mut(id) {
                        live.phone_number = Some(phone.clone());
                    }
                    tables.backoff.remove(id);
                }
                info!(session_id = id, phone_number = %phone, "Session connected");
                self.events.emit(SessionEvent::Connected {
                    session_id: id.to_string(),
                    phone_number: phone,
                });
            }
            TransportEvent::AuthUpdated(state) => {
                self.vault.schedule_save(id, state);
            }
            TransportEvent::Message(raw) => {
                if let Some(msg) = normalize_inbound(id, &raw) {
                    let mut tables = self.tables.lock().unwrap();
                    if let Some(live) = tables.sessions.get_mut(id) {
                        live.messages_received += 1;
                    }
                    drop(tables);
                    self.events.emit(SessionEvent::Message(msg));
                }
            }
            TransportEvent::Closed(reason) => {
                self.handle_close(id, reason).await;
            }
        }
    }

    async fn handle_close(self: &Arc<Self>, id: &str, reason: CloseReason) {
        // The transport already closed the socket; drop our entry. The
        // pump (this task) exits right after this handler returns.
        { self.tables.lock().unwrap().sessions.remove(id) };

        match classify_close(&reason) {
            CloseClass::LoggedOut => {
                info!(session_id = id, "Session logged out, clearing credentials");
                self.vault.cancel(id);
                if let Err(e) = self.store.clear_credentials(id).await {
                    warn!(session_id = id, error = %e, "Failed to clear credentials");
                }
                if let Err(e) = self.store.mark_disconnected(id, Some("logged_out")).await {
                    warn!(session_id = id, error = %e, "Failed to persist disconnect");
                }
                self.events.emit(SessionEvent::Disconnected {
                    session_id: id.to_string(),
                    reason: "logged_out".to_string(),
                });
            }
            CloseClass::RestartRequired => {
                debug!(session_id = id, "Transient stream restart, reconnecting immediately");
                self.schedule_reconnect_fixed(id, self.config.restart_retry_delay);
            }
            CloseClass::Banned => {
                warn!(session_id = id, "Account banned, no reconnection will be attempted");
                if let Err(e) = self
                    .store
                    .update_status(id, SessionStatus::Banned, Some(&reason.message))
                    .await
                {
                    warn!(session_id = id, error = %e, "Failed to persist banned status");
                }
                self.events.emit(SessionEvent::Disconnected {
                    session_id: id.to_string(),
                    reason: "banned".to_string(),
                });
            }
            CloseClass::Other(cause) => {
                info!(session_id = id, reason = %cause, "Connection lost, scheduling reconnect");
                if let Err(e) = self
                    .store
                    .update_status(id, SessionStatus::Reconnecting, Some(&cause))
                    .await
                {
                    warn!(session_id = id, error = %e, "Failed to persist reconnecting status");
                }
                self.events.emit(SessionEvent::Disconnected {
                    session_id: id.to_string(),
                    reason: cause,
                });
                self.schedule_reconnect_backoff(id);
            }
        }
    }

    /// Backing-off reconnect. A pending timer for the id makes this a
    /// no-op, so two close events cannot race into competing attempts.
    fn schedule_reconnect_backoff(self: &Arc<Self>, id: &str) {
        let delay = {
            let mut tables = self.tables.lock().unwrap();
            if tables.timers.contains_key(id) {
                return;
            }
            let base = self.config.backoff_base;
            let cap = self.config.backoff_cap;
            tables
                .backoff
                .entry(id.to_string())
                .or_insert_with(|| ReconnectBackoff::new(base, cap))
                .next_delay()
        };
        debug!(session_id = id, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
        self.spawn_timer(id, delay);
    }

    /// Fixed-delay reconnect for the restart-required path. Always
    /// replaces any pending timer, ignoring backoff state.
    fn schedule_reconnect_fixed(self: &Arc<Self>, id: &str, delay: Duration) {
        if let Some(previous) = self.tables.lock().unwrap().timers.remove(id) {
            previous.abort();
        }
        self.spawn_timer(id, delay);
    }

    fn spawn_timer(self: &Arc<Self>, id: &str, delay: Duration) {
        let inner = Arc::clone(self);
        let session_id = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.tables.lock().unwrap().timers.remove(&session_id);
            if let Err(e) = inner.start_session(&session_id).await {
                warn!(session_id = %session_id, error = %e, "Reconnect attempt failed");
                let _ = inner
                    .store
                    .update_status(&session_id, SessionStatus::Reconnecting, Some(&e.to_string()))
                    .await;
                inner.schedule_reconnect_backoff(&session_id);
            }
        });
        self.tables
            .lock()
            .unwrap()
            .timers
            .insert(id.to_string(), handle);
    }

    fn cancel_timer(&self, id: &str) {
        if let Some(timer) = self.tables.lock().unwrap().timers.remove(id) {
            timer.abort();
        }
    }
}
