//! In-memory credential and key material for one session.
//!
//! `AuthState` is what the vault encrypts into the session row's blob
//! column. It holds the long-lived registration credentials plus the
//! incrementally accumulated protocol key map. Encoding is CBOR with a
//! `BTreeMap` so the same state always serializes to the same bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Codec errors for the plaintext side of the blob.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Decoding failed: {0}")]
    Decode(String),
}

/// Long-lived registration material for a session.
///
/// Populated by the transport once the device is paired; `jid` stays `None`
/// until the network has assigned an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Full network identity (e.g. `"5511999999999:1@s.messaging.net"`).
    pub jid: Option<String>,

    /// Registration id negotiated during pairing.
    pub registration_id: u32,

    /// Transport noise keypair, serialized by the protocol layer.
    pub noise_key: Vec<u8>,

    /// Long-term identity keypair, serialized by the protocol layer.
    pub identity_key: Vec<u8>,
}

/// Credential + key material for one session.
///
/// Keys are stored under compound `"{key_type}:{key_id}"` entries and
/// accumulate as the protocol negotiates session/group keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthState {
    pub credentials: Option<Credentials>,
    pub keys: BTreeMap<String, Vec<u8>>,
}

impl AuthState {
    /// An empty state, forcing a fresh QR pairing cycle.
    pub fn fresh() -> Self {
        Self::default()
    }

    /// Whether this state can resume a session without re-pairing.
    pub fn is_registered(&self) -> bool {
        self.credentials.is_some()
    }

    /// Store key material under its compound identifier.
    pub fn insert_key(&mut self, key_type: &str, key_id: &str, material: Vec<u8>) {
        self.keys.insert(format!("{}:{}", key_type, key_id), material);
    }

    /// Fetch key material by type and id.
    pub fn key(&self, key_type: &str, key_id: &str) -> Option<&[u8]> {
        self.keys
            .get(&format!("{}:{}", key_type, key_id))
            .map(Vec::as_slice)
    }

    /// Serialize to the canonical CBOR plaintext.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize from the CBOR plaintext.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registered_state() -> AuthState {
        let mut state = AuthState::fresh();
        state.credentials = Some(Credentials {
            jid: Some("5511999999999:1@s.messaging.net".to_string()),
            registration_id: 42,
            noise_key: vec![1, 2, 3],
            identity_key: vec![4, 5, 6],
        });
        state.insert_key("session", "peer-1", vec![7, 8]);
        state.insert_key("sender-key", "group-9", vec![9]);
        state
    }

    #[test]
    fn test_fresh_state_is_unregistered() {
        let state = AuthState::fresh();
        assert!(!state.is_registered());
        assert!(state.keys.is_empty());
    }

    #[test]
    fn test_compound_key_lookup() {
        let state = registered_state();
        assert_eq!(state.key("session", "peer-1"), Some(&[7u8, 8][..]));
        assert_eq!(state.key("session", "peer-2"), None);
        assert_eq!(state.key("sender-key", "group-9"), Some(&[9u8][..]));
    }

    #[test]
    fn test_codec_round_trip() {
        let state = registered_state();
        let bytes = state.encode().unwrap();
        assert_eq!(AuthState::decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let mut a = AuthState::fresh();
        a.insert_key("session", "x", vec![1]);
        a.insert_key("app-state", "y", vec![2]);

        let mut b = AuthState::fresh();
        b.insert_key("app-state", "y", vec![2]);
        b.insert_key("session", "x", vec![1]);

        assert_eq!(a.encode().unwrap(), b.encode().unwrap());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(AuthState::decode(b"not cbor at all").is_err());
    }
}
