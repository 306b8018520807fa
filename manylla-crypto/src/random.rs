//! Cryptographically secure random generation.
//!
//! Every identifier and secret in the sync layer (recovery phrases, device
//! ids, nonces, share keys) is drawn from a [`SecureRandom`]. The entropy
//! source is pluggable so embedders can supply a platform source and tests
//! can simulate a broken one.

use crate::error::{CryptoError, CryptoResult};
use rand::TryRngCore;
use rand::rngs::OsRng;
use std::fmt;
use std::sync::Arc;

const UPPERCASE: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A source of cryptographically secure bytes.
pub trait EntropySource: Send + Sync {
    /// Fills `dest` entirely or fails. Partial fills are never reported as success.
    fn try_fill(&self, dest: &mut [u8]) -> CryptoResult<()>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn try_fill(&self, dest: &mut [u8]) -> CryptoResult<()> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| CryptoError::RandomUnavailable(e.to_string()))
    }
}

/// Character classes for [`SecureRandom::random_alphanumeric`].
#[derive(Debug, Clone)]
pub struct CharsetOptions {
    pub uppercase: bool,
    pub lowercase: bool,
    pub numbers: bool,
    /// Characters removed from the resulting charset.
    pub exclude: String,
}

impl Default for CharsetOptions {
    fn default() -> Self {
        Self {
            uppercase: true,
            lowercase: true,
            numbers: true,
            exclude: String::new(),
        }
    }
}

impl CharsetOptions {
    fn charset(&self) -> String {
        let mut charset = String::new();
        if self.uppercase {
            charset.push_str(UPPERCASE);
        }
        if self.lowercase {
            charset.push_str(LOWERCASE);
        }
        if self.numbers {
            charset.push_str(DIGITS);
        }
        charset.retain(|c| !self.exclude.contains(c));
        charset
    }
}

/// Secure random provider shared across the sync layer.
#[derive(Clone)]
pub struct SecureRandom {
    source: Arc<dyn EntropySource>,
}

impl fmt::Debug for SecureRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureRandom").finish_non_exhaustive()
    }
}

impl Default for SecureRandom {
    fn default() -> Self {
        Self::os()
    }
}

impl SecureRandom {
    /// Provider backed by the operating-system CSPRNG.
    pub fn os() -> Self {
        Self::new(Arc::new(OsEntropy))
    }

    pub fn new(source: Arc<dyn EntropySource>) -> Self {
        Self { source }
    }

    /// Returns `n` secure random bytes.
    pub fn random_bytes(&self, n: usize) -> CryptoResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    /// Fills a caller-provided buffer.
    pub fn fill(&self, dest: &mut [u8]) -> CryptoResult<()> {
        self.source.try_fill(dest)
    }

    /// Uniform integer in `0..max` using rejection sampling.
    ///
    /// Values from the biased tail of the 32-bit range are discarded rather
    /// than folded with `%`, so every result is equally likely.
    pub fn random_int(&self, max: u32) -> CryptoResult<u32> {
        if max == 0 {
            return Err(CryptoError::InvalidArgument(
                "max must be a positive integer".to_string(),
            ));
        }
        let zone = u32::MAX - (u32::MAX % max);
        loop {
            let mut buf = [0u8; 4];
            self.fill(&mut buf)?;
            let value = u32::from_be_bytes(buf);
            if value < zone {
                return Ok(value % max);
            }
        }
    }

    /// Float in `[0, 1)` with 32 bits of entropy.
    pub fn random_float(&self) -> CryptoResult<f64> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf)?;
        Ok(f64::from(u32::from_be_bytes(buf)) / 4_294_967_296.0)
    }

    /// Lowercase hex string of `len` characters. `len` must be even.
    pub fn random_hex(&self, len: usize) -> CryptoResult<String> {
        if len % 2 != 0 {
            return Err(CryptoError::InvalidArgument(
                "hex string length must be even".to_string(),
            ));
        }
        Ok(hex::encode(self.random_bytes(len / 2)?))
    }

    /// String of `len` characters drawn uniformly from `charset`.
    pub fn random_string(&self, charset: &str, len: usize) -> CryptoResult<String> {
        let chars: Vec<char> = charset.chars().collect();
        if chars.is_empty() {
            return Err(CryptoError::InvalidArgument(
                "charset cannot be empty".to_string(),
            ));
        }
        if len == 0 {
            return Err(CryptoError::InvalidArgument(
                "length must be positive".to_string(),
            ));
        }
        let bound = u32::try_from(chars.len())
            .map_err(|_| CryptoError::InvalidArgument("charset too large".to_string()))?;

        let mut out = String::with_capacity(len);
        for _ in 0..len {
            out.push(chars[self.random_int(bound)? as usize]);
        }
        Ok(out)
    }

    pub fn random_alphanumeric(&self, len: usize, options: &CharsetOptions) -> CryptoResult<String> {
        let charset = options.charset();
        if charset.is_empty() {
            return Err(CryptoError::InvalidArgument(
                "charset is empty after applying options".to_string(),
            ));
        }
        self.random_string(&charset, len)
    }

    /// 16-character hex device identifier.
    pub fn generate_device_id(&self) -> CryptoResult<String> {
        self.random_hex(16)
    }

    /// Base36 timestamp followed by nine random lowercase alphanumerics.
    pub fn generate_timestamp_id(&self, unix_millis: i64) -> CryptoResult<String> {
        let suffix = self.random_alphanumeric(
            9,
            &CharsetOptions {
                uppercase: false,
                ..CharsetOptions::default()
            },
        )?;
        Ok(format!("{}{suffix}", to_base36(unix_millis.unsigned_abs())))
    }

    /// Exercises every primitive; false means the platform cannot be trusted
    /// to generate secrets.
    pub fn self_test(&self) -> bool {
        let check = || -> CryptoResult<bool> {
            let bytes = self.random_bytes(16)?;
            // A stuck source repeats itself.
            let again = self.random_bytes(16)?;
            let int = self.random_int(100)?;
            let float = self.random_float()?;
            let hex = self.random_hex(8)?;
            let string = self.random_string("ABC", 5)?;
            let alnum = self.random_alphanumeric(12, &CharsetOptions::default())?;
            Ok(bytes.len() == 16
                && bytes != again
                && int < 100
                && (0.0..1.0).contains(&float)
                && hex.len() == 8
                && string.chars().count() == 5
                && alnum.len() == 12)
        };
        match check() {
            Ok(ok) => ok,
            Err(e) => {
                tracing::warn!("secure random self-test failed: {e}");
                false
            }
        }
    }
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
