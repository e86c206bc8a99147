//! Credential vault.
//!
//! Turns an in-memory [`AuthState`] into one encrypted blob on the session
//! row and back, and owns the debounce that keeps rapid key churn (pairing
//! handshakes mutate keys many times per second) from amplifying into a
//! write per mutation.
//!
//! Failure posture: a blob that fails to decrypt or decode yields a fresh
//! empty state (re-pair instead of crash); a failed debounced write is
//! logged and left for the next mutation's window to retry.

pub mod auth_state;
pub mod crypto;

pub use auth_state::{AuthState, CodecError, Credentials};
pub use crypto::{CryptoError, NONCE_LEN, TAG_LEN};

use crate::store::{SessionStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Default quiet period before a scheduled save fires.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Vault errors. Only `save` surfaces these; `load` recovers internally.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Encrypts and persists per-session credential material, with a per-id
/// debounced write path.
///
/// Cloning is cheap; clones share the pending-save table.
#[derive(Clone)]
pub struct CredentialVault<S: SessionStore> {
    inner: Arc<VaultInner<S>>,
}

struct VaultInner<S: SessionStore> {
    store: Arc<S>,
    key: Zeroizing<[u8; 32]>,
    quiet_period: Duration,
    pending: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl<S: SessionStore> CredentialVault<S> {
    pub fn new(store: Arc<S>, key: [u8; 32]) -> Self {
        Self::with_quiet_period(store, key, DEFAULT_SAVE_DEBOUNCE)
    }

    pub fn with_quiet_period(store: Arc<S>, key: [u8; 32], quiet_period: Duration) -> Self {
        Self {
            inner: Arc::new(VaultInner {
                store,
                key: Zeroizing::new(key),
                quiet_period,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Load the persisted state for `session_id`.
    ///
    /// Never fails: a missing blob means a never-paired (or logged-out)
    /// session, and a blob that cannot be decrypted or decoded is treated
    /// the same way after a warning, forcing re-authentication instead of
    /// crashing the process.
    pub async fn load(&self, session_id: &str) -> AuthState {
        let blob = match self.inner.store.load_credentials(session_id).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return AuthState::fresh(),
            Err(e) => {
                warn!(session_id, error = %e, "Failed to read credential blob, starting fresh");
                return AuthState::fresh();
            }
        };

        match crypto::open(&self.inner.key, &blob).and_then(|plaintext| {
            AuthState::decode(&plaintext)
                .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
        }) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    session_id,
                    error = %e,
                    "Credential blob unreadable, falling back to fresh state"
                );
                AuthState::fresh()
            }
        }
    }

    /// Encrypt and persist `state` immediately.
    pub async fn save(&self, session_id: &str, state: &AuthState) -> Result<(), VaultError> {
        self.inner.persist(session_id, state).await
    }

    /// Debounced save: coalesces bursts of mutations for the same session
    /// into one write after a quiet period. A newer call re-arms the timer;
    /// it never fires twice for one burst.
    ///
    /// Persistence failures inside the fired task are logged and swallowed
    /// so credential mutation never blocks protocol progress.
    pub fn schedule_save(&self, session_id: &str, state: AuthState) {
        let inner = Arc::clone(&self.inner);
        let id = session_id.to_string();
        let task = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let id = id.clone();
            async move {
                tokio::time::sleep(inner.quiet_period).await;
                inner.pending.lock().unwrap().remove(&id);
                if let Err(e) = inner.persist(&id, &state).await {
                    warn!(session_id = %id, error = %e, "Debounced credential save failed");
                }
            }
        });

        let mut pending = inner.pending.lock().unwrap();
        if let Some(previous) = pending.insert(id, task) {
            previous.abort();
        }
    }

    /// Revoke any pending debounced save for `session_id`.
    ///
    /// Called before credentials are cleared so a timer firing late cannot
    /// resurrect a logged-out credential set.
    pub fn cancel(&self, session_id: &str) {
        if let Some(task) = self.inner.pending.lock().unwrap().remove(session_id) {
            task.abort();
            debug!(session_id, "Cancelled pending credential save");
        }
    }

    /// Revoke every pending debounced save (process shutdown).
    pub fn cancel_all(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        for (_, task) in pending.drain() {
            task.abort();
        }
    }

    /// Number of pending debounced saves (diagnostics and tests).
    pub fn pending_saves(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }
}

impl<S: SessionStore> VaultInner<S> {
    async fn persist(&self, session_id: &str, state: &AuthState) -> Result<(), VaultError> {
        let plaintext = state.encode()?;
        let blob = crypto::seal(&self.key, &plaintext)?;
        self.store.save_credentials(session_id, &blob).await?;
        debug!(session_id, bytes = blob.len(), "Persisted credential blob");
        Ok(())
    }
}
