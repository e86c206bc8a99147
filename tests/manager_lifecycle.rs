//! Integration tests for the connection manager lifecycle.
//!
//! These tests drive the manager over a scriptable mock transport and an
//! in-memory session store and validate the complete flows:
//! - Fresh session → QR issued → scan → connected
//! - Duplicate start → old socket fully torn down first
//! - Transient close → backing-off reconnect, doubling up to the cap
//! - Restart-required close → immediate fixed-delay reconnect
//! - Logout close → credentials cleared, no reconnect
//! - Banned close → terminal status, no reconnect
//! - Restart recovery → staggered restore of restartable rows
//! - Shutdown → both in-memory tables empty
//!
//! Timers run under paused tokio time, so backoff delays are observed
//! without real waiting.

use courier::manager::{ConnectionManager, ManagerConfig, ManagerError, SessionEvent};
use courier::store::{MemorySessionStore, SessionStatus, SessionStore};
use courier::transport::{
    CloseReason, MessageKey, MockCall, MockTransport, RawContent, RawMessage, SendMessageRequest,
    TransportEvent,
};
use courier::vault::{AuthState, Credentials};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const KEY: [u8; 32] = *b"an example very very secret key!";
const JID: &str = "5511999999999:1";

type TestManager = ConnectionManager<MockTransport, MemorySessionStore>;

fn build_manager() -> (TestManager, MockTransport, Arc<MemorySessionStore>) {
    let transport = MockTransport::new();
    let store = Arc::new(MemorySessionStore::new());
    let manager = ConnectionManager::new(
        transport.clone(),
        Arc::clone(&store),
        KEY,
        ManagerConfig {
            // keep the debounce sub-second so paused time flushes it fast
            save_debounce: Duration::from_millis(50),
            ..ManagerConfig::default()
        },
    );
    (manager, transport, store)
}

/// Let spawned pumps and timers run to quiescence under paused time.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn registered_auth() -> AuthState {
    let mut state = AuthState::fresh();
    state.credentials = Some(Credentials {
        jid: Some(format!("{}@s.messaging.net", JID)),
        registration_id: 1,
        noise_key: vec![1; 32],
        identity_key: vec![2; 32],
    });
    state
}

fn inbound_text(jid: &str, text: &str) -> RawMessage {
    RawMessage {
        key: MessageKey {
            remote_jid: jid.to_string(),
            from_me: false,
            id: "WIRE-1".to_string(),
        },
        push_name: Some("Alice".to_string()),
        timestamp: 1_700_000_000,
        content: RawContent {
            conversation: Some(text.to_string()),
            ..Default::default()
        },
    }
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn fresh_session_issues_one_qr() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    transport.script_events("s1", vec![TransportEvent::Qr("qr-payload".to_string())]);

    let mut events = manager.subscribe();
    manager.start_session("s1").await.unwrap();
    settle().await;

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    assert!(
        matches!(&emitted[0], SessionEvent::Qr { session_id, qr_code }
            if session_id == "s1" && qr_code == "qr-payload")
    );

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::WaitingQr);
    assert!(row.qr_code.is_some());
}

#[tokio::test(start_paused = true)]
async fn handshake_marks_connected_and_clears_qr() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    transport.script_events("s1", vec![TransportEvent::Qr("qr-payload".to_string())]);

    let mut events = manager.subscribe();
    manager.start_session("s1").await.unwrap();
    settle().await;

    transport.push_event("s1", TransportEvent::Open { jid: JID.to_string() });
    settle().await;

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Connected);
    assert_eq!(row.phone_number.as_deref(), Some("5511999999999"));
    assert!(row.qr_code.is_none());
    assert!(row.last_connected_at.is_some());

    let emitted = drain(&mut events);
    assert!(emitted.iter().any(|e| matches!(e,
        SessionEvent::Connected { phone_number, .. } if phone_number == "5511999999999")));

    let status = manager.get_status();
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.connected_sessions, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_tears_down_old_socket_first() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();

    manager.start_session("s1").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    assert_eq!(manager.live_sessions(), 1);

    // Old socket closed before the replacement connected.
    let calls: Vec<MockCall> = manager_calls_for(&transport, "s1");
    assert_eq!(
        calls,
        vec![
            MockCall::Connect("s1".to_string()),
            MockCall::Close("s1".to_string()),
            MockCall::Connect("s1".to_string()),
        ]
    );
}

fn manager_calls_for(transport: &MockTransport, id: &str) -> Vec<MockCall> {
    transport
        .calls()
        .into_iter()
        .filter(|c| {
            matches!(c,
                MockCall::Connect(s) | MockCall::Close(s) | MockCall::Logout(s) if s == id)
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn send_without_connection_rejects() {
    let (manager, _transport, store) = build_manager();

    let result = manager
        .send_message(SendMessageRequest {
            session_id: "unknown".to_string(),
            to: "5511888888888".to_string(),
            message: "hello".to_string(),
            kind: Default::default(),
            media_url: None,
            caption: None,
        })
        .await;

    assert!(matches!(result, Err(ManagerError::NotConnected(id)) if id == "unknown"));
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn send_through_live_session() {
    let (manager, _transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    let receipt = manager
        .send_message(SendMessageRequest {
            session_id: "s1".to_string(),
            to: "5511888888888".to_string(),
            message: "hello".to_string(),
            kind: Default::default(),
            media_url: None,
            caption: None,
        })
        .await
        .unwrap();

    assert_eq!(receipt.status, "sent");
    assert!(!receipt.message_id.is_empty());
    assert_eq!(manager.get_status().sessions[0].messages_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_messages_are_normalized_and_counted() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    let mut events = manager.subscribe();
    transport.push_message("s1", inbound_text("5511777777777@s.messaging.net", "oi"));
    // Self-sent and broadcast traffic must never surface.
    let mut own = inbound_text("5511777777777@s.messaging.net", "me");
    own.key.from_me = true;
    transport.push_message("s1", own);
    transport.push_message("s1", inbound_text("status@broadcast", "story"));
    settle().await;

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    match &emitted[0] {
        SessionEvent::Message(msg) => {
            assert_eq!(msg.session_id, "s1");
            assert_eq!(msg.from, "5511777777777");
            assert_eq!(msg.text, "oi");
            assert!(!msg.is_group);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(manager.get_status().sessions[0].messages_received, 1);
}

#[tokio::test(start_paused = true)]
async fn logout_clears_credentials_and_stays_down() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    store.save_credentials("s1", b"sealed").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    let mut events = manager.subscribe();
    transport.push_close("s1", CloseReason::new(401, "logged out from device"));
    settle().await;

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Disconnected);
    assert!(row.session_data_encrypted.is_none());

    let emitted = drain(&mut events);
    assert!(emitted.iter().any(|e| matches!(e,
        SessionEvent::Disconnected { reason, .. } if reason == "logged_out")));

    // Terminal: no reconnect attempt ever fires.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count("s1"), 1);
    assert_eq!(manager.live_sessions(), 0);
    assert_eq!(manager.pending_reconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn banned_is_terminal() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    transport.push_close("s1", CloseReason::new(403, "account forbidden"));
    settle().await;

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Banned);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count("s1"), 1);
    assert_eq!(manager.pending_reconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_required_reconnects_after_one_second() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    let mut events = manager.subscribe();
    transport.push_close("s1", CloseReason::new(515, "stream errored"));
    settle().await;

    // Not yet: the fixed delay is 1s.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.connect_count("s1"), 1);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(transport.connect_count("s1"), 2);
    assert_eq!(manager.live_sessions(), 1);

    // No demotion event on this path.
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_close_backs_off_doubling_then_resets() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;

    // Two reconnect attempts will fail at the transport level.
    transport.fail_next_connects("s1", 2);
    transport.push_close("s1", CloseReason::new(500, "connection lost"));
    settle().await;

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Reconnecting);
    assert_eq!(manager.pending_reconnects(), 1);

    // First retry after 3s (fails).
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(transport.connect_count("s1"), 2);

    // Second after a further 6s (fails).
    tokio::time::sleep(Duration::from_millis(3000)).await;
    assert_eq!(transport.connect_count("s1"), 2);
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(transport.connect_count("s1"), 3);

    // Third after a further 12s succeeds and clears backoff memory.
    tokio::time::sleep(Duration::from_millis(12100)).await;
    assert_eq!(transport.connect_count("s1"), 4);
    assert_eq!(manager.live_sessions(), 1);
    assert_eq!(manager.pending_reconnects(), 0);

    // The next failure starts over at 3s, not 24s.
    transport.push_close("s1", CloseReason::new(500, "connection lost again"));
    settle().await;
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert_eq!(transport.connect_count("s1"), 5);
}

#[tokio::test(start_paused = true)]
async fn startup_restores_restartable_rows_and_isolates_failures() {
    let (manager, transport, store) = build_manager();

    for id in ["alpha", "beta", "idle"] {
        store.create(id, "tenant-a").await.unwrap();
    }
    // Restartable rows need a credential blob written through the vault.
    manager.vault().save("alpha", &registered_auth()).await.unwrap();
    manager.vault().save("beta", &registered_auth()).await.unwrap();
    store.mark_connected("alpha", "5511999999999").await.unwrap();
    store
        .update_status("beta", SessionStatus::Reconnecting, None)
        .await
        .unwrap();
    // idle stays disconnected and must not be restored.

    transport.fail_next_connects("alpha", 1);
    manager.connect().await.unwrap();
    settle().await;

    // alpha failed to restore and is marked error; beta is live.
    assert_eq!(store.get("alpha").await.unwrap().unwrap().status, SessionStatus::Error);
    assert_eq!(manager.live_sessions(), 1);
    assert_eq!(transport.connect_count("beta"), 1);
    assert_eq!(transport.connect_count("idle"), 0);

    // beta resumed with its stored credentials.
    assert_eq!(transport.last_connect_was_registered("beta"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn auth_updates_persist_across_restart() {
    let transport_a = MockTransport::new();
    let store = Arc::new(MemorySessionStore::new());
    let config = ManagerConfig {
        save_debounce: Duration::from_millis(50),
        ..ManagerConfig::default()
    };
    let manager_a = ConnectionManager::new(transport_a.clone(), Arc::clone(&store), KEY, config.clone());

    store.create("s1", "tenant-a").await.unwrap();
    manager_a.start_session("s1").await.unwrap();
    settle().await;

    transport_a.push_event("s1", TransportEvent::Open { jid: JID.to_string() });
    transport_a.push_event("s1", TransportEvent::AuthUpdated(registered_auth()));
    tokio::time::sleep(Duration::from_millis(100)).await; // flush debounce
    manager_a.shutdown().await;

    // New process: same store and key, fresh transport and manager.
    let transport_b = MockTransport::new();
    let manager_b = ConnectionManager::new(transport_b.clone(), Arc::clone(&store), KEY, config);
    manager_b.connect().await.unwrap();
    settle().await;

    assert_eq!(transport_b.connect_count("s1"), 1);
    assert_eq!(transport_b.last_connect_was_registered("s1"), Some(true));
}

#[tokio::test(start_paused = true)]
async fn reset_session_forces_fresh_qr_cycle() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    manager.vault().save("s1", &registered_auth()).await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;
    assert_eq!(transport.last_connect_was_registered("s1"), Some(true));

    manager.reset_session("s1").await.unwrap();
    settle().await;

    let row = store.get("s1").await.unwrap().unwrap();
    assert_eq!(row.status, SessionStatus::Disconnected);
    assert!(row.session_data_encrypted.is_none());
    assert_eq!(manager.live_sessions(), 0);

    // Logout was issued at the protocol level before closing.
    let calls = manager_calls_for(&transport, "s1");
    assert_eq!(
        calls,
        vec![
            MockCall::Connect("s1".to_string()),
            MockCall::Logout("s1".to_string()),
            MockCall::Close("s1".to_string()),
        ]
    );

    // Starting again pairs from scratch.
    manager.start_session("s1").await.unwrap();
    settle().await;
    assert_eq!(transport.last_connect_was_registered("s1"), Some(false));
}

#[tokio::test(start_paused = true)]
async fn shutdown_empties_both_tables() {
    let (manager, transport, store) = build_manager();
    for id in ["a", "b", "c"] {
        store.create(id, "tenant-a").await.unwrap();
        manager.start_session(id).await.unwrap();
    }
    settle().await;

    // Leave one session mid-reconnect so a timer is pending at shutdown.
    transport.push_close("c", CloseReason::new(500, "connection lost"));
    settle().await;
    assert_eq!(manager.pending_reconnects(), 1);

    manager.shutdown().await;

    assert_eq!(manager.live_sessions(), 0);
    assert_eq!(manager.pending_reconnects(), 0);

    // The pending timer never fires a late reconnect.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.connect_count("c"), 1);
}

#[tokio::test(start_paused = true)]
async fn list_sessions_reports_row_status() {
    let (manager, transport, store) = build_manager();
    store.create("s1", "tenant-a").await.unwrap();
    store.create("s2", "tenant-b").await.unwrap();
    manager.start_session("s1").await.unwrap();
    settle().await;
    transport.push_event("s1", TransportEvent::Open { jid: JID.to_string() });
    settle().await;

    let sessions = manager.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 2);
    let s1 = sessions.iter().find(|s| s.id == "s1").unwrap();
    assert_eq!(s1.status, SessionStatus::Connected);
    assert_eq!(s1.phone_number.as_deref(), Some("5511999999999"));
    let s2 = sessions.iter().find(|s| s.id == "s2").unwrap();
    assert_eq!(s2.status, SessionStatus::Disconnected);
}
