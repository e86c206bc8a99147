//! SQLite-backed session store.
//!
//! Single `sessions` table, bootstrapped on open. Each mutation is one
//! idempotent UPDATE addressed by primary key; rows for different sessions
//! never contend.

use super::{unix_now, SessionRecord, SessionStatus, SessionStore, StoreResult};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id                      TEXT PRIMARY KEY,
    tenant_id               TEXT NOT NULL,
    status                  TEXT NOT NULL DEFAULT 'disconnected',
    phone_number            TEXT,
    qr_code                 TEXT,
    qr_expires_at           INTEGER,
    last_connected_at       INTEGER,
    last_error              TEXT,
    session_data_encrypted  BLOB,
    created_at              INTEGER NOT NULL,
    updated_at              INTEGER NOT NULL
)
"#;

/// Session store over a SQLite pool.
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (creating if needed) the database at `path` and ensure the
    /// schema exists.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(pool).await
    }

    /// In-memory database, for tests and throwaway runs.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> StoreResult<Self> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<SessionRecord> {
        let status: String = row.get("status");
        Ok(SessionRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            status: SessionStatus::parse(&status)?,
            phone_number: row.get("phone_number"),
            qr_code: row.get("qr_code"),
            qr_expires_at: row.get("qr_expires_at"),
            last_connected_at: row.get("last_connected_at"),
            last_error: row.get("last_error"),
            session_data_encrypted: row.get("session_data_encrypted"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, id: &str, tenant_id: &str) -> StoreResult<()> {
        let now = unix_now();
        sqlx::query(
            "INSERT INTO sessions (id, tenant_id, status, created_at, updated_at)
             VALUES (?1, ?2, 'disconnected', ?3, ?3)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(id)
        .bind(tenant_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list(&self) -> StoreResult<Vec<SessionRecord>> {
        let rows = sqlx::query("SELECT * FROM sessions ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn list_restartable(&self) -> StoreResult<Vec<SessionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions
             WHERE status IN ('connected', 'reconnecting')
               AND session_data_encrypted IS NOT NULL
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::record_from_row).collect()
    }

    async fn set_qr_code(&self, id: &str, code: &str, ttl: Duration) -> StoreResult<()> {
        let now = unix_now();
        sqlx::query(
            "UPDATE sessions
             SET status = 'waiting_qr', qr_code = ?2, qr_expires_at = ?3, updated_at = ?4
             WHERE id = ?1",
        )
        .bind(id)
        .bind(code)
        .bind(now + ttl.as_secs() as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_connected(&self, id: &str, phone_number: &str) -> StoreResult<()> {
        let now = unix_now();
        sqlx::query(
            "UPDATE sessions
             SET status = 'connected', phone_number = ?2, qr_code = NULL,
                 qr_expires_at = NULL, last_connected_at = ?3, last_error = NULL,
                 updated_at = ?3
             WHERE id = ?1",
        )
        .bind(id)
        .bind(phone_number)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_disconnected(&self, id: &str, reason: Option<&str>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE sessions
             SET status = 'disconnected', last_error = ?2, updated_at = ?3
             WHERE id = ?1",
        )
        .bind(id)
        .bind(reason)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE sessions
             SET status = ?2, last_error = COALESCE(?3, last_error), updated_at = ?4
             WHERE id = ?1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_credentials(&self, id: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE sessions SET session_data_encrypted = NULL, updated_at = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_credentials(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT session_data_encrypted FROM sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get("session_data_encrypted")))
    }

    async fn save_credentials(&self, id: &str, blob: &[u8]) -> StoreResult<()> {
        sqlx::query(
            "UPDATE sessions SET session_data_encrypted = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(blob)
        .bind(unix_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
