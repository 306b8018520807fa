//! Stable per-install device identity.

use crate::clock::Clock;
use crate::store::{KEY_DEVICE_ID, SecureStore};
use manylla_crypto::SecureRandom;
use tracing::warn;

/// Length of a device id in hex characters.
pub const DEVICE_ID_LEN: usize = 16;

fn timestamp_fallback(clock: &dyn Clock) -> String {
    format!("{:016x}", clock.now_millis())
}

/// Returns the persisted device id, creating it on first use.
///
/// Never fails: if the store or the random source is unavailable, a
/// timestamp-derived id is used instead.
pub async fn get_or_create(store: &dyn SecureStore, rng: &SecureRandom, clock: &dyn Clock) -> String {
    match store.get(KEY_DEVICE_ID).await {
        Ok(Some(id)) if !id.is_empty() => return id,
        Ok(_) => {}
        Err(e) => {
            warn!("device id lookup failed, using timestamp id: {e}");
            return timestamp_fallback(clock);
        }
    }

    let id = match rng.generate_device_id() {
        Ok(id) => id,
        Err(e) => {
            warn!("random source unavailable for device id: {e}");
            timestamp_fallback(clock)
        }
    };
    if let Err(e) = store.set(KEY_DEVICE_ID, &id).await {
        warn!("failed to persist device id: {e}");
    }
    id
}
