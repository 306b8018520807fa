//! Authenticated encryption of sync payloads.
//!
//! XChaCha20-Poly1305 with a random 24-byte nonce per message. The header
//! (version, flags, optional key reference) is bound to the ciphertext as
//! associated data, so flipping a compression flag or swapping a key
//! reference fails authentication like any other tampering.
//!
//! Wire layout (standard base64 of):
//!
//! ```text
//! version(1) | flags(1) | [key_ref(8) if FLAG_KEY_REF] | nonce(24) | ciphertext+tag
//! ```

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use crate::random::SecureRandom;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chacha20poly1305::aead::{Aead, Payload};
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

/// Current blob format version.
pub const BLOB_VERSION: u8 = 2;
/// XChaCha20 nonce size in bytes.
pub const NONCE_SIZE: usize = 24;
/// Poly1305 tag size in bytes.
pub const TAG_SIZE: usize = 16;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const FLAG_KEY_REF: u8 = 0b0000_0010;
const KEY_REF_SIZE: usize = 8;

/// Plaintexts above this size are candidates for compression.
const COMPRESSION_THRESHOLD: usize = 1024;
const COMPRESSION_LEVEL: i32 = 3;
/// Upper bound on a decompressed payload. Share blobs come from other people.
pub const MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Ciphertext plus everything needed to decrypt it except the key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBlob {
    pub version: u8,
    pub compressed: bool,
    /// Fingerprint of the key that sealed a share blob.
    pub key_ref: Option<[u8; KEY_REF_SIZE]>,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedBlob {
    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.key_ref.is_some() {
            flags |= FLAG_KEY_REF;
        }
        flags
    }

    fn header(&self) -> Vec<u8> {
        let mut header = vec![self.version, self.flags()];
        if let Some(key_ref) = &self.key_ref {
            header.extend_from_slice(key_ref);
        }
        header
    }

    /// Encodes the blob as a base64 string for transport.
    pub fn to_wire(&self) -> String {
        let mut bytes = self.header();
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        STANDARD.encode(bytes)
    }

    /// Decodes a blob produced by [`EncryptedBlob::to_wire`].
    pub fn from_wire(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::MalformedBlob(format!("invalid base64: {e}")))?;

        let (&version, rest) = bytes
            .split_first()
            .ok_or_else(|| CryptoError::MalformedBlob("empty blob".to_string()))?;
        if version != BLOB_VERSION {
            return Err(CryptoError::MalformedBlob(format!(
                "unsupported blob version {version}"
            )));
        }
        let (&flags, mut rest) = rest
            .split_first()
            .ok_or_else(|| CryptoError::MalformedBlob("missing flags".to_string()))?;

        let key_ref = if flags & FLAG_KEY_REF != 0 {
            if rest.len() < KEY_REF_SIZE {
                return Err(CryptoError::MalformedBlob("truncated key reference".to_string()));
            }
            let mut key_ref = [0u8; KEY_REF_SIZE];
            key_ref.copy_from_slice(&rest[..KEY_REF_SIZE]);
            rest = &rest[KEY_REF_SIZE..];
            Some(key_ref)
        } else {
            None
        };

        if rest.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::MalformedBlob("truncated ciphertext".to_string()));
        }
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&rest[..NONCE_SIZE]);

        Ok(Self {
            version,
            compressed: flags & FLAG_COMPRESSED != 0,
            key_ref,
            nonce,
            ciphertext: rest[NONCE_SIZE..].to_vec(),
        })
    }
}

/// Encrypts `plaintext`, compressing first when it pays off.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8], rng: &SecureRandom) -> CryptoResult<EncryptedBlob> {
    seal(key, plaintext, rng, None)
}

/// Like [`encrypt`], but stamps the blob with the key's fingerprint.
pub fn encrypt_with_key_ref(
    key: &DerivedKey,
    plaintext: &[u8],
    rng: &SecureRandom,
) -> CryptoResult<EncryptedBlob> {
    seal(key, plaintext, rng, Some(key.key_ref()))
}

fn seal(
    key: &DerivedKey,
    plaintext: &[u8],
    rng: &SecureRandom,
    key_ref: Option<[u8; KEY_REF_SIZE]>,
) -> CryptoResult<EncryptedBlob> {
    let (body, compressed) = maybe_compress(plaintext);

    let mut nonce = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce)?;

    let mut blob = EncryptedBlob {
        version: BLOB_VERSION,
        compressed,
        key_ref,
        nonce,
        ciphertext: Vec::new(),
    };
    let aad = blob.header();

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    blob.ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: &body,
                aad: &aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(blob)
}

/// Decrypts and authenticates a blob. Any mismatch yields [`CryptoError::Decryption`].
pub fn decrypt(key: &DerivedKey, blob: &EncryptedBlob) -> CryptoResult<Vec<u8>> {
    if blob.version != BLOB_VERSION {
        return Err(CryptoError::MalformedBlob(format!(
            "unsupported blob version {}",
            blob.version
        )));
    }
    if let Some(expected) = blob.key_ref {
        if expected != key.key_ref() {
            return Err(CryptoError::Decryption(
                "key does not match the blob's key reference".to_string(),
            ));
        }
    }

    let aad = blob.header();
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let body = cipher
        .decrypt(
            XNonce::from_slice(&blob.nonce),
            Payload {
                msg: &blob.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| {
            CryptoError::Decryption("authentication failed (wrong key or corrupted data)".to_string())
        })?;

    if blob.compressed {
        zstd::bulk::decompress(&body, MAX_DECOMPRESSED_SIZE)
            .map_err(|e| CryptoError::Decryption(format!("decompression failed: {e}")))
    } else {
        Ok(body)
    }
}

fn maybe_compress(plaintext: &[u8]) -> (Vec<u8>, bool) {
    if plaintext.len() <= COMPRESSION_THRESHOLD {
        return (plaintext.to_vec(), false);
    }
    match zstd::encode_all(plaintext, COMPRESSION_LEVEL) {
        // Only keep it if it saves at least 10%.
        Ok(compressed) if compressed.len() * 10 < plaintext.len() * 9 => (compressed, true),
        Ok(_) => (plaintext.to_vec(), false),
        Err(e) => {
            tracing::warn!("payload compression failed, sending uncompressed: {e}");
            (plaintext.to_vec(), false)
        }
    }
}
