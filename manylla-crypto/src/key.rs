//! Recovery phrases, sync ids and key derivation.
//!
//! The recovery phrase is the only root of trust. Two values are derived from
//! it with unrelated constructions:
//!
//! - the **sync id**, a SHA-256 based lookup key that is safe to send to the
//!   server, and
//! - the **encryption key**, an Argon2id output that never leaves the device.

use crate::error::{CryptoError, CryptoResult};
use crate::random::SecureRandom;
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Length of a recovery phrase in hex characters (128 bits).
pub const RECOVERY_PHRASE_LEN: usize = 32;

/// Domain-separated fixed salt. Safe because the phrase carries 128 bits of entropy.
const KDF_SALT: &[u8; 16] = b"manylla-sync-kdf";

const SYNC_ID_DOMAIN: &[u8] = b"manylla-sync-id-v1:";

/// A 32-character lowercase hex recovery phrase.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RecoveryPhrase(String);

impl RecoveryPhrase {
    /// Generates a fresh phrase from 16 random bytes.
    pub fn generate(rng: &SecureRandom) -> CryptoResult<Self> {
        Ok(Self(rng.random_hex(RECOVERY_PHRASE_LEN)?))
    }

    /// Parses user input. Case-insensitive; surrounding whitespace is ignored.
    pub fn parse(input: &str) -> CryptoResult<Self> {
        let normalized = input.trim().to_ascii_lowercase();
        if Self::is_valid(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(CryptoError::InvalidRecoveryPhrase)
        }
    }

    /// True if `input` is exactly 32 lowercase hex characters.
    pub fn is_valid(input: &str) -> bool {
        input.len() == RECOVERY_PHRASE_LEN
            && input.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derives the non-secret remote lookup key for this phrase.
    pub fn sync_id(&self) -> SyncId {
        SyncId::from_phrase(self)
    }
}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveryPhrase(<redacted>)")
    }
}

/// Non-secret identifier addressing a sync group on the remote store.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncId(String);

impl SyncId {
    pub fn from_phrase(phrase: &RecoveryPhrase) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(SYNC_ID_DOMAIN);
        hasher.update(phrase.as_str().as_bytes());
        let digest = hex::encode(hasher.finalize());
        Self(digest[..32].to_string())
    }

    /// Wraps a previously persisted id without re-deriving it.
    pub fn from_persisted(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal cost. Only for tests; never use for real phrases.
    pub fn for_testing() -> Self {
        Self {
            memory_kib: 256,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// First eight bytes of SHA-256 over the key; identifies a key without revealing it.
    pub fn key_ref(&self) -> [u8; 8] {
        let digest = Sha256::digest(self.0);
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        out
    }

    /// Fresh random key, independent of any recovery phrase.
    pub fn random(rng: &SecureRandom) -> CryptoResult<Self> {
        let mut bytes = [0u8; KEY_SIZE];
        rng.fill(&mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derives the encryption key for a recovery phrase.
///
/// Deterministic for a given phrase and parameter set. CPU and memory heavy;
/// async callers should run it on a blocking thread.
pub fn derive_key(phrase: &RecoveryPhrase, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
    let mut out = [0u8; KEY_SIZE];
    argon
        .hash_password_into(phrase.as_str().as_bytes(), KDF_SALT, &mut out)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = DerivedKey(out);
    out.zeroize();
    Ok(key)
}
