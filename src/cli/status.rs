//! `courier status` — list session rows.

use super::config::CourierConfig;
use courier::store::{SessionStore, SqliteSessionStore};

pub async fn execute(config: &CourierConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = SqliteSessionStore::open(&config.database.path).await?;
    let rows = store.list().await?;

    if rows.is_empty() {
        println!("No sessions.");
        return Ok(());
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs() as i64;

    println!(
        "{:<24} {:<14} {:<16} {:<8} {}",
        "ID", "STATUS", "PHONE", "QR", "LAST ERROR"
    );
    for row in rows {
        println!(
            "{:<24} {:<14} {:<16} {:<8} {}",
            row.id,
            row.status.to_string(),
            row.phone_number.as_deref().unwrap_or("-"),
            if row.qr_is_valid(now) { "valid" } else { "-" },
            row.last_error.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
