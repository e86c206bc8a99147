//! Persisted session rows.
//!
//! One row per logical connection. The row is the source of truth for
//! recovery across restarts; the connection manager's in-memory socket
//! table is derived, disposable state. The `SessionStore` trait keeps the
//! manager testable against `MemorySessionStore` without a database.

pub mod mock;
pub mod sqlite;

pub use mock::MemorySessionStore;
pub use sqlite::SqliteSessionStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unknown session status: {0}")]
    UnknownStatus(String),

    #[error("Session not found: {0}")]
    NotFound(String),
}

/// Lifecycle status of a session row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    WaitingQr,
    Connected,
    Reconnecting,
    Error,
    Banned,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::WaitingQr => "waiting_qr",
            SessionStatus::Connected => "connected",
            SessionStatus::Reconnecting => "reconnecting",
            SessionStatus::Error => "error",
            SessionStatus::Banned => "banned",
        }
    }

    pub fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "disconnected" => Ok(SessionStatus::Disconnected),
            "waiting_qr" => Ok(SessionStatus::WaitingQr),
            "connected" => Ok(SessionStatus::Connected),
            "reconnecting" => Ok(SessionStatus::Reconnecting),
            "error" => Ok(SessionStatus::Error),
            "banned" => Ok(SessionStatus::Banned),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted session row. Timestamps are unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub tenant_id: String,
    pub status: SessionStatus,
    pub phone_number: Option<String>,
    pub qr_code: Option<String>,
    pub qr_expires_at: Option<i64>,
    pub last_connected_at: Option<i64>,
    pub last_error: Option<String>,
    pub session_data_encrypted: Option<Vec<u8>>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionRecord {
    /// A QR is usable only while a code is present and unexpired,
    /// independent of the row still being in `waiting_qr`.
    pub fn qr_is_valid(&self, now: i64) -> bool {
        self.qr_code.is_some() && self.qr_expires_at.is_some_and(|exp| now < exp)
    }
}

/// CRUD over session rows, scoped to what the connection manager needs.
///
/// Every operation is an idempotent single-row write; sessions are
/// independent so no multi-row transactions exist.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Upsert a row for a new logical session (no-op if it exists).
    async fn create(&self, id: &str, tenant_id: &str) -> StoreResult<()>;

    /// Fetch a single row.
    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>>;

    /// All rows, for diagnostics listings.
    async fn list(&self) -> StoreResult<Vec<SessionRecord>>;

    /// Rows that were `connected` or `reconnecting` before the last
    /// shutdown and still hold a credential blob. Used only at startup.
    async fn list_restartable(&self) -> StoreResult<Vec<SessionRecord>>;

    /// Move to `waiting_qr` with a fresh code expiring `ttl` from now.
    async fn set_qr_code(&self, id: &str, code: &str, ttl: Duration) -> StoreResult<()>;

    /// Move to `connected`: clears QR fields and `last_error`, records the
    /// phone number and `last_connected_at`.
    async fn mark_connected(&self, id: &str, phone_number: &str) -> StoreResult<()>;

    /// Move to `disconnected`, recording the reason as `last_error`.
    async fn mark_disconnected(&self, id: &str, reason: Option<&str>) -> StoreResult<()>;

    /// Generic transition for `reconnecting`/`error`/`banned`.
    async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()>;

    /// Null out the credential blob (explicit logout or operator reset).
    async fn clear_credentials(&self, id: &str) -> StoreResult<()>;

    /// Read the encrypted credential blob.
    async fn load_credentials(&self, id: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Write the encrypted credential blob.
    async fn save_credentials(&self, id: &str, blob: &[u8]) -> StoreResult<()>;
}

/// Current wall clock as unix seconds.
pub(crate) fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            SessionStatus::Disconnected,
            SessionStatus::WaitingQr,
            SessionStatus::Connected,
            SessionStatus::Reconnecting,
            SessionStatus::Error,
            SessionStatus::Banned,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!(matches!(
            SessionStatus::parse("zombie"),
            Err(StoreError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_qr_validity_window() {
        let mut record = SessionRecord {
            id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            status: SessionStatus::WaitingQr,
            phone_number: None,
            qr_code: Some("qr-payload".to_string()),
            qr_expires_at: Some(1_000_060),
            last_connected_at: None,
            last_error: None,
            session_data_encrypted: None,
            created_at: 1_000_000,
            updated_at: 1_000_000,
        };

        // Valid immediately after issuance, invalid at/after expiry.
        assert!(record.qr_is_valid(1_000_000));
        assert!(record.qr_is_valid(1_000_059));
        assert!(!record.qr_is_valid(1_000_060));
        assert!(!record.qr_is_valid(1_000_061));

        // Status alone never makes a missing code valid.
        record.qr_code = None;
        assert!(!record.qr_is_valid(1_000_000));
    }
}
