//! Credential blob encryption.
//!
//! The vault persists one opaque blob per session, laid out as
//! `nonce(12) || auth_tag(16) || ciphertext` so the store needs a single
//! binary column and no separate tag/nonce bookkeeping. AES-256-GCM with a
//! process-wide 32-byte pre-shared key.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Errors that can occur during blob encryption operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Blob too short: {0} bytes")]
    BlobTooShort(usize),
}

/// Encrypt `plaintext` into the `nonce || tag || ciphertext` blob layout.
///
/// A fresh random nonce is drawn from the system RNG for every call;
/// nonces are never reused across writes.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    SystemRandom::new()
        .fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::EncryptionFailed("Nonce generation failed".to_string()))?;

    let nonce = Nonce::try_assume_unique_for_key(&nonce_bytes)
        .map_err(|_| CryptoError::EncryptionFailed("Failed to create nonce".to_string()))?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Key creation failed: {}", e)))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    // ring appends the tag after the ciphertext; rearrange into the
    // nonce || tag || ciphertext layout the store column expects.
    let mut in_out = plaintext.to_vec();
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|e| CryptoError::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    let ct_len = in_out.len() - TAG_LEN;
    let mut blob = Vec::with_capacity(NONCE_LEN + in_out.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&in_out[ct_len..]);
    blob.extend_from_slice(&in_out[..ct_len]);
    Ok(blob)
}

/// Decrypt a `nonce || tag || ciphertext` blob back into plaintext.
///
/// Fails on truncated input, a wrong key, or any bit flip in the blob
/// (the tag authenticates the whole ciphertext).
pub fn open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::BlobTooShort(blob.len()));
    }

    let (nonce_bytes, rest) = blob.split_at(NONCE_LEN);
    let (tag, ciphertext) = rest.split_at(TAG_LEN);

    let nonce = Nonce::try_assume_unique_for_key(nonce_bytes)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid nonce".to_string()))?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Key creation failed: {}", e)))?;
    let opening_key = LessSafeKey::new(unbound_key);

    // Reassemble into ring's ciphertext || tag ordering.
    let mut in_out = Vec::with_capacity(ciphertext.len() + TAG_LEN);
    in_out.extend_from_slice(ciphertext);
    in_out.extend_from_slice(tag);

    let plaintext_len = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::DecryptionFailed("Authentication failed".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}
