//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in the encryption layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("secure random source unavailable: {0}")]
    RandomUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid recovery phrase: expected 32 hex characters")]
    InvalidRecoveryPhrase,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("malformed encrypted blob: {0}")]
    MalformedBlob(String),

    #[error("encryption not initialized")]
    NotInitialized,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
