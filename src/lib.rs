//! Courier - multi-session messaging connection manager.
//!
//! Opens, maintains, and recovers many concurrent stateful protocol
//! sessions (one or more per tenant) against an external multi-device
//! messaging network, persists encrypted credential material across
//! process restarts, and turns raw protocol events into a normalized
//! event stream.
//!
//! Key principles:
//! - The persisted session row is the source of truth; the in-memory
//!   socket table is disposable
//! - At most one live socket per session id, ever
//! - Transient failures back off and retry; logout and bans are terminal
//! - One session's failure never takes down the process or its neighbors
//!
//! The wire protocol itself is external: integrators supply a
//! [`transport::Transport`] implementation and embed the manager:
//!
//! ```no_run
//! use courier::manager::{ConnectionManager, ManagerConfig};
//! use courier::store::SqliteSessionStore;
//! use courier::transport::MockTransport;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteSessionStore::open("sessions.db").await?);
//! let manager = ConnectionManager::new(
//!     MockTransport::new(), // your Transport implementation
//!     store,
//!     [0u8; 32], // 32-byte session key from config
//!     ManagerConfig::default(),
//! );
//! let mut events = manager.subscribe();
//! manager.connect().await?; // restore sessions from the last run
//! while let Ok(event) = events.recv().await {
//!     // forward to the platform notifier
//!     let _ = event;
//! }
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod store;
pub mod transport;
pub mod vault;

pub use manager::{ConnectionManager, ManagerConfig, ManagerError, SessionEvent};
pub use store::{SessionRecord, SessionStatus, SessionStore};
pub use transport::{SendMessageRequest, Transport, TransportEvent};
pub use vault::{AuthState, CredentialVault};
