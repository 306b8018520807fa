//! Sync engine configuration.

use crate::error::{SyncError, SyncResult};
use manylla_crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the sync API (e.g., "https://manylla.com/qual/api").
    pub api_base_url: String,

    /// Quiet period before a debounced push fires (milliseconds).
    pub push_debounce_ms: u64,

    /// Interval between background pulls (seconds).
    pub poll_interval_secs: u64,

    /// Interval between connectivity probes (seconds).
    pub network_check_interval_secs: u64,

    /// Total attempts for a push before the failure is surfaced.
    pub max_retries: u32,

    /// Base delay between push attempts; doubles after each failure (milliseconds).
    pub retry_base_delay_ms: u64,

    /// Capacity of the offline queue; the oldest entry is evicted beyond it.
    pub offline_queue_capacity: usize,

    /// Per-request HTTP timeout (seconds).
    pub request_timeout_secs: u64,

    /// Lifetime of an invite code (hours).
    pub invite_ttl_hours: i64,

    /// Argon2id cost for deriving the session key.
    pub kdf: KdfParams,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://manylla.com/qual/api".to_string(),
            push_debounce_ms: 2_000,
            poll_interval_secs: 60,
            network_check_interval_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 5_000,
            offline_queue_capacity: 10,
            request_timeout_secs: 30,
            invite_ttl_hours: 24,
            kdf: KdfParams::default(),
        }
    }
}

impl SyncConfig {
    /// Creates a config for tests: short timers, cheap key derivation.
    pub fn test(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            push_debounce_ms: 50,
            poll_interval_secs: 3_600,
            network_check_interval_secs: 3_600,
            max_retries: 3,
            retry_base_delay_ms: 1,
            offline_queue_capacity: 10,
            request_timeout_secs: 5,
            invite_ttl_hours: 24,
            kdf: KdfParams::for_testing(),
        }
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SyncError::Config("missing api_base_url".to_string()));
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "api_base_url must be an http(s) URL, got {}",
                self.api_base_url
            )));
        }
        if self.max_retries == 0 {
            return Err(SyncError::Config("max_retries must be at least 1".to_string()));
        }
        if self.offline_queue_capacity == 0 {
            return Err(SyncError::Config(
                "offline_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_secs == 0 || self.network_check_interval_secs == 0 {
            return Err(SyncError::Config("timer intervals must be non-zero".to_string()));
        }
        if self.invite_ttl_hours <= 0 {
            return Err(SyncError::Config("invite_ttl_hours must be positive".to_string()));
        }
        Ok(())
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn network_check_interval(&self) -> Duration {
        Duration::from_secs(self.network_check_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Backoff before retry number `attempt` (0-based).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}
