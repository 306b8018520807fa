//! Session-scoped encryption of JSON payloads.
//!
//! [`EncryptionService`] holds the key derived from the active recovery
//! phrase for the lifetime of a sync session. Individual calls are
//! stateless apart from that cached key.

use crate::cipher::{self, EncryptedBlob};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{DerivedKey, KEY_SIZE};
use crate::random::SecureRandom;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::RwLock;
use tracing::debug;

/// A payload encrypted under a one-off key, for link-based sharing.
///
/// `key` travels out of band (typically a URL fragment) and must never be
/// sent to the server alongside `data`.
#[derive(Clone, Debug)]
pub struct ShareBundle {
    /// Wire-encoded blob, safe to upload.
    pub data: String,
    /// URL-safe base64 of the ephemeral key.
    pub key: String,
}

/// Encrypts and decrypts payloads with the cached session key.
pub struct EncryptionService {
    rng: SecureRandom,
    session_key: RwLock<Option<DerivedKey>>,
}

impl EncryptionService {
    pub fn new(rng: SecureRandom) -> Self {
        Self {
            rng,
            session_key: RwLock::new(None),
        }
    }

    /// Installs the session key.
    pub fn unlock(&self, key: DerivedKey) {
        match self.session_key.write() {
            Ok(mut guard) => *guard = Some(key),
            Err(poisoned) => *poisoned.into_inner() = Some(key),
        }
        debug!("encryption session unlocked");
    }

    /// Drops the session key; the previous key is zeroized.
    pub fn lock(&self) {
        match self.session_key.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        debug!("encryption session locked");
    }

    pub fn is_unlocked(&self) -> bool {
        self.with_key(|_| Ok(())).is_ok()
    }

    fn with_key<R>(&self, f: impl FnOnce(&DerivedKey) -> CryptoResult<R>) -> CryptoResult<R> {
        let guard = self
            .session_key
            .read()
            .map_err(|_| CryptoError::NotInitialized)?;
        let key = guard.as_ref().ok_or(CryptoError::NotInitialized)?;
        f(key)
    }

    /// Serializes and encrypts `payload`, returning the wire string.
    pub fn encrypt_payload<T: Serialize + ?Sized>(&self, payload: &T) -> CryptoResult<String> {
        let plaintext = serde_json::to_vec(payload)?;
        self.with_key(|key| Ok(cipher::encrypt(key, &plaintext, &self.rng)?.to_wire()))
    }

    /// Decrypts a wire string produced by [`EncryptionService::encrypt_payload`].
    pub fn decrypt_payload<T: DeserializeOwned>(&self, data: &str) -> CryptoResult<T> {
        let blob = EncryptedBlob::from_wire(data)?;
        let plaintext = self.with_key(|key| cipher::decrypt(key, &blob))?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// Encrypts `payload` under a fresh key unrelated to the recovery phrase.
    ///
    /// Works without an unlocked session.
    pub fn encrypt_for_share<T: Serialize + ?Sized>(&self, payload: &T) -> CryptoResult<ShareBundle> {
        let plaintext = serde_json::to_vec(payload)?;
        let key = DerivedKey::random(&self.rng)?;
        let blob = cipher::encrypt_with_key_ref(&key, &plaintext, &self.rng)?;
        Ok(ShareBundle {
            data: blob.to_wire(),
            key: URL_SAFE_NO_PAD.encode(key.as_bytes()),
        })
    }

    /// Opens a share given its blob and out-of-band key.
    pub fn decrypt_share<T: DeserializeOwned>(&self, data: &str, key: &str) -> CryptoResult<T> {
        let key_bytes = URL_SAFE_NO_PAD
            .decode(key.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid share key encoding: {e}")))?;
        if key_bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: key_bytes.len(),
            });
        }
        let key = DerivedKey::from_slice(&key_bytes)?;
        let blob = EncryptedBlob::from_wire(data)?;
        let plaintext = cipher::decrypt(&key, &blob)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
