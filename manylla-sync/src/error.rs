//! Sync error types.

use manylla_crypto::CryptoError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("device offline: {0}")]
    Offline(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("sync credentials rejected: {0}")]
    Auth(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("invite code expired: {0}")]
    Expired(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("sync is not enabled")]
    NotEnabled,

    #[error("API request failed: {0}")]
    Api(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

/// Coarse error category reported to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Offline,
    Network,
    Auth,
    Decryption,
    Expired,
    NotFound,
    NotEnabled,
    Api,
    Storage,
    Config,
    Internal,
}

impl From<CryptoError> for SyncError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::Decryption(msg) => SyncError::Decryption(msg),
            CryptoError::MalformedBlob(msg) => SyncError::Decryption(msg),
            CryptoError::InvalidRecoveryPhrase => SyncError::Validation(err.to_string()),
            other => SyncError::Crypto(other),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SyncError::Api(format!("invalid response body: {err}"))
        } else {
            SyncError::Network(err.to_string())
        }
    }
}

impl SyncError {
    /// True for transient failures worth retrying locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network(_))
    }

    /// True when retrying or requeueing can never succeed without user action.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_) | SyncError::Decryption(_) | SyncError::Validation(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Offline(_) => ErrorKind::Offline,
            SyncError::Network(_) => ErrorKind::Network,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Decryption(_) => ErrorKind::Decryption,
            SyncError::Expired(_) => ErrorKind::Expired,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::NotEnabled => ErrorKind::NotEnabled,
            SyncError::Api(_) => ErrorKind::Api,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Serialization(_) | SyncError::Crypto(_) => ErrorKind::Internal,
        }
    }
}
