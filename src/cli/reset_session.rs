//! `courier reset-session` — operator-driven credential reset.
//!
//! Clears the stored credential blob and marks the row disconnected, so
//! the next start of this session issues a fresh QR. Run against a stopped
//! service; a running manager resets live sessions through its own
//! `reset_session` operation.

use super::config::CourierConfig;
use courier::store::{SessionStore, SqliteSessionStore};

pub async fn execute(config: &CourierConfig, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteSessionStore::open(&config.database.path).await?;

    let Some(record) = store.get(id).await? else {
        return Err(format!("No session with id '{}'", id).into());
    };

    store.clear_credentials(id).await?;
    store.mark_disconnected(id, None).await?;

    println!(
        "Session '{}' reset (was {}). Next start will issue a new QR code.",
        id, record.status
    );
    Ok(())
}
