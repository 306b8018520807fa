//! Encryption layer for Manylla sync.
//!
//! Provides zero-knowledge payload encryption using:
//! - A pluggable secure random provider for every secret and nonce
//! - Argon2id to turn a 128-bit recovery phrase into a symmetric key
//! - XChaCha20-Poly1305 for authenticated encryption
//! - Ephemeral keys for link-based shares
//!
//! # Architecture
//!
//! The recovery phrase is the single root of trust:
//!
//! 1. **Sync id**: a SHA-256 based, non-secret lookup key for the server.
//! 2. **Session key**: derived with Argon2id and cached by the
//!    [`EncryptionService`] while sync is enabled. It never leaves the device.
//!
//! Shares use a random key that is unrelated to the phrase, so handing out a
//! share link never exposes the owner's root secret.

pub mod cipher;
mod error;
pub mod key;
pub mod random;
pub mod service;

pub use cipher::{BLOB_VERSION, EncryptedBlob, NONCE_SIZE, TAG_SIZE, decrypt, encrypt};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, KEY_SIZE, KdfParams, RecoveryPhrase, SyncId, derive_key};
pub use random::{CharsetOptions, EntropySource, OsEntropy, SecureRandom};
pub use service::{EncryptionService, ShareBundle};
