//! In-memory session store for tests.

use super::{unix_now, SessionRecord, SessionStatus, SessionStore, StoreResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Map-backed `SessionStore` with the same single-row-write semantics as
/// the SQLite implementation.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    rows: Arc<Mutex<BTreeMap<String, SessionRecord>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a row directly, bypassing the trait (test setup helper).
    pub fn insert(&self, record: SessionRecord) {
        self.rows.lock().unwrap().insert(record.id.clone(), record);
    }

    fn update<F: FnOnce(&mut SessionRecord)>(&self, id: &str, f: F) {
        let mut rows = self.rows.lock().unwrap();
        if let Some(record) = rows.get_mut(id) {
            f(record);
            record.updated_at = unix_now();
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, id: &str, tenant_id: &str) -> StoreResult<()> {
        let now = unix_now();
        self.rows
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_insert_with(|| SessionRecord {
                id: id.to_string(),
                tenant_id: tenant_id.to_string(),
                status: SessionStatus::Disconnected,
                phone_number: None,
                qr_code: None,
                qr_expires_at: None,
                last_connected_at: None,
                last_error: None,
                session_data_encrypted: None,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        Ok(self.rows.lock().unwrap().get(id).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<SessionRecord>> {
        Ok(self.rows.lock().unwrap().values().cloned().collect())
    }

    async fn list_restartable(&self) -> StoreResult<Vec<SessionRecord>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                matches!(
                    r.status,
                    SessionStatus::Connected | SessionStatus::Reconnecting
                ) && r.session_data_encrypted.is_some()
            })
            .cloned()
            .collect())
    }

    async fn set_qr_code(&self, id: &str, code: &str, ttl: Duration) -> StoreResult<()> {
        self.update(id, |r| {
            r.status = SessionStatus::WaitingQr;
            r.qr_code = Some(code.to_string());
            r.qr_expires_at = Some(unix_now() + ttl.as_secs() as i64);
        });
        Ok(())
    }

    async fn mark_connected(&self, id: &str, phone_number: &str) -> StoreResult<()> {
        self.update(id, |r| {
            r.status = SessionStatus::Connected;
            r.phone_number = Some(phone_number.to_string());
            r.qr_code = None;
            r.qr_expires_at = None;
            r.last_connected_at = Some(unix_now());
            r.last_error = None;
        });
        Ok(())
    }

    async fn mark_disconnected(&self, id: &str, reason: Option<&str>) -> StoreResult<()> {
        self.update(id, |r| {
            r.status = SessionStatus::Disconnected;
            r.last_error = reason.map(str::to_string);
        });
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: SessionStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        self.update(id, |r| {
            r.status = status;
            if let Some(err) = last_error {
                r.last_error = Some(err.to_string());
            }
        });
        Ok(())
    }

    async fn clear_credentials(&self, id: &str) -> StoreResult<()> {
        self.update(id, |r| r.session_data_encrypted = None);
        Ok(())
    }

    async fn load_credentials(&self, id: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(id)
            .and_then(|r| r.session_data_encrypted.clone()))
    }

    async fn save_credentials(&self, id: &str, blob: &[u8]) -> StoreResult<()> {
        self.update(id, |r| r.session_data_encrypted = Some(blob.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_matches_sqlite_semantics() {
        let store = MemorySessionStore::new();
        store.create("s1", "t").await.unwrap();
        store.save_credentials("s1", b"blob").await.unwrap();
        store.mark_connected("s1", "111").await.unwrap();

        assert_eq!(store.list_restartable().await.unwrap().len(), 1);

        store.clear_credentials("s1").await.unwrap();
        assert!(store.list_restartable().await.unwrap().is_empty());
        assert!(store.load_credentials("s1").await.unwrap().is_none());
    }
}
