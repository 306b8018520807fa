//! Short invite codes for adding a device to a sync group.
//!
//! A code is an 8-character handle (`XXXX-XXXX`) derived from the recovery
//! phrase. Only the issuing device holds the code-to-phrase mapping, kept in
//! the secure store under [`KEY_INVITES`]; the relay never sees it. The
//! phrase itself travels in the URL fragment of an invite link.

use crate::clock::Clock;
use crate::error::{SyncError, SyncResult};
use crate::store::{KEY_INVITES, SecureStore};
use manylla_crypto::{RecoveryPhrase, SyncId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

const INVITE_DOMAIN: &[u8] = b"manylla-invite-v1:";

/// Code alphabet. Leaves out `0`, `O`, `1`, `I` and `L`, which are easy to misread.
pub const INVITE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

/// Path segment preceding the code in invite links.
const INVITE_PATH: &str = "/sync/";

/// An invite issued on this device.
#[derive(Clone, Debug)]
pub struct InviteCode {
    /// Grouped form, e.g. `3F9A-XC7B`.
    pub code: String,
    pub sync_id: SyncId,
    pub recovery_phrase: RecoveryPhrase,
    /// Unix milliseconds.
    pub created_at: i64,
    /// Unix milliseconds.
    pub expires_at: i64,
}

impl InviteCode {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at < now_millis
    }
}

/// Persisted form of an invite.
#[derive(Clone, Serialize, Deserialize)]
struct StoredInvite {
    sync_id: SyncId,
    recovery_phrase: String,
    created_at: i64,
    expires_at: i64,
}

/// What the user typed into the join field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinInput {
    /// Normalized `XXXX-XXXX` code.
    InviteCode(String),
    RecoveryPhrase(RecoveryPhrase),
}

/// Computes the code for `phrase` without storing anything.
pub fn code_for(phrase: &RecoveryPhrase) -> String {
    let mut hasher = Sha256::new();
    hasher.update(INVITE_DOMAIN);
    hasher.update(phrase.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut n = u64::from_be_bytes(seed);
    let radix = INVITE_CHARS.len() as u64;
    let mut code = String::with_capacity(CODE_LEN + 1);
    for i in 0..CODE_LEN {
        if i == CODE_LEN / 2 {
            code.push('-');
        }
        code.push(char::from(INVITE_CHARS[(n % radix) as usize]));
        n /= radix;
    }
    code
}

/// Canonical form of a user-typed code: trimmed, uppercase, dash-grouped.
///
/// Returns `None` if the input is not an 8-character alphanumeric code.
pub fn normalize_code(input: &str) -> Option<String> {
    let compact: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let dashes = input.chars().filter(|c| *c == '-').count();
    if compact.len() != 8 || dashes > 1 || !compact.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!("{}-{}", &compact[..4], &compact[4..]))
}

/// True for `XXXX-XXXX` or `XXXXXXXX` alphanumeric input.
pub fn validate_format(input: &str) -> bool {
    let trimmed = input.trim();
    let bytes = trimmed.as_bytes();
    match bytes.len() {
        8 => bytes.iter().all(u8::is_ascii_alphanumeric),
        9 => {
            bytes[4] == b'-'
                && bytes[..4].iter().all(u8::is_ascii_alphanumeric)
                && bytes[5..].iter().all(u8::is_ascii_alphanumeric)
        }
        _ => false,
    }
}

/// Decides whether join input is an invite code or a recovery phrase.
pub fn classify(input: &str) -> SyncResult<JoinInput> {
    let trimmed = input.trim();
    if RecoveryPhrase::is_valid(&trimmed.to_ascii_lowercase()) {
        return Ok(JoinInput::RecoveryPhrase(RecoveryPhrase::parse(trimmed)?));
    }
    if validate_format(trimmed) {
        if let Some(code) = normalize_code(trimmed) {
            return Ok(JoinInput::InviteCode(code));
        }
    }
    Err(SyncError::Validation(
        "expected an invite code (XXXX-XXXX) or a 32-character recovery phrase".to_string(),
    ))
}

/// Builds a shareable link: `{base}/sync/{code}#{phrase}`.
pub fn invite_url(base_url: &str, code: &str, phrase: &RecoveryPhrase) -> String {
    format!(
        "{}{INVITE_PATH}{code}#{}",
        base_url.trim_end_matches('/'),
        phrase.as_str()
    )
}

/// Extracts the code and phrase from an invite link.
///
/// Either half may be missing; a fragment that is not a valid phrase is
/// reported as `None`.
pub fn parse_invite_url(url: &str) -> (Option<String>, Option<RecoveryPhrase>) {
    let (location, fragment) = match url.split_once('#') {
        Some((loc, frag)) => (loc, Some(frag)),
        None => (url, None),
    };

    let code = location.find(INVITE_PATH).and_then(|idx| {
        let rest = &location[idx + INVITE_PATH.len()..];
        let segment = rest.split(['/', '?']).next().unwrap_or_default();
        if validate_format(segment) {
            normalize_code(segment)
        } else {
            None
        }
    });
    let phrase = fragment.and_then(|f| RecoveryPhrase::parse(f).ok());
    (code, phrase)
}

/// Issues and resolves invite codes against the local secure store.
pub struct InviteCodec {
    store: Arc<dyn SecureStore>,
    clock: Arc<dyn Clock>,
    ttl_millis: i64,
}

impl InviteCodec {
    pub fn new(store: Arc<dyn SecureStore>, clock: Arc<dyn Clock>, ttl_hours: i64) -> Self {
        Self {
            store,
            clock,
            ttl_millis: ttl_hours.saturating_mul(60 * 60 * 1000),
        }
    }

    async fn load(&self) -> SyncResult<BTreeMap<String, StoredInvite>> {
        match self.store.get(KEY_INVITES).await? {
            Some(raw) if !raw.trim().is_empty() => Ok(serde_json::from_str(&raw)?),
            _ => Ok(BTreeMap::new()),
        }
    }

    async fn save(&self, invites: &BTreeMap<String, StoredInvite>) -> SyncResult<()> {
        if invites.is_empty() {
            return self.store.remove(KEY_INVITES).await;
        }
        let raw = serde_json::to_string(invites)?;
        self.store.set(KEY_INVITES, &raw).await
    }

    /// Issues (or refreshes) the invite for `phrase`.
    pub async fn generate(&self, phrase: &RecoveryPhrase) -> SyncResult<InviteCode> {
        let code = code_for(phrase);
        let created_at = self.clock.now_millis();
        let invite = InviteCode {
            code: code.clone(),
            sync_id: phrase.sync_id(),
            recovery_phrase: phrase.clone(),
            created_at,
            expires_at: created_at.saturating_add(self.ttl_millis),
        };

        let mut invites = self.load().await?;
        invites.insert(
            code.clone(),
            StoredInvite {
                sync_id: invite.sync_id.clone(),
                recovery_phrase: phrase.as_str().to_string(),
                created_at: invite.created_at,
                expires_at: invite.expires_at,
            },
        );
        self.save(&invites).await?;
        info!("issued invite code {code}");
        Ok(invite)
    }

    /// Looks up the phrase behind a locally issued code.
    pub async fn resolve(&self, code: &str) -> SyncResult<RecoveryPhrase> {
        let normalized = normalize_code(code)
            .ok_or_else(|| SyncError::Validation(format!("malformed invite code: {}", code.trim())))?;

        let mut invites = self.load().await?;
        let Some(stored) = invites.get(&normalized) else {
            return Err(SyncError::NotFound(format!("invite code {normalized}")));
        };

        if stored.expires_at < self.clock.now_millis() {
            invites.remove(&normalized);
            self.save(&invites).await?;
            debug!("evicted expired invite {normalized}");
            return Err(SyncError::Expired(format!("invite code {normalized}")));
        }

        Ok(RecoveryPhrase::parse(&stored.recovery_phrase)?)
    }

    /// Removes expired invites; returns how many were dropped.
    pub async fn cleanup_expired(&self) -> SyncResult<usize> {
        let mut invites = self.load().await?;
        let now = self.clock.now_millis();
        let before = invites.len();
        invites.retain(|_, inv| inv.expires_at >= now);
        let removed = before - invites.len();
        if removed > 0 {
            self.save(&invites).await?;
            debug!("cleaned up {removed} expired invites");
        }
        Ok(removed)
    }

    /// Drops every invite, e.g. when sync is disabled.
    pub async fn clear(&self) -> SyncResult<()> {
        self.store.remove(KEY_INVITES).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    const PHRASE: &str = "0123456789abcdef0123456789abcdef";
    const HOUR: i64 = 60 * 60 * 1000;

    fn codec() -> (InviteCodec, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new());
        (InviteCodec::new(store.clone(), clock.clone(), 24), clock, store)
    }

    #[test]
    fn code_is_grouped_from_unambiguous_alphabet() {
        let phrase = RecoveryPhrase::parse(PHRASE).unwrap();
        let code = code_for(&phrase);
        assert_eq!(code.len(), 9);
        assert_eq!(&code[4..5], "-");
        assert!(code.bytes().filter(|c| *c != b'-').all(|c| INVITE_CHARS.contains(&c)));
        assert_eq!(code, code_for(&phrase));
        assert!(validate_format(&code));
    }

    #[test]
    fn codes_never_use_confusable_characters() {
        let rng = manylla_crypto::SecureRandom::os();
        for _ in 0..200 {
            let code = code_for(&RecoveryPhrase::generate(&rng).unwrap());
            assert!(!code.contains(['0', '1', 'O', 'I', 'L']), "{code}");
        }
    }

    #[test]
    fn format_validation() {
        assert!(validate_format("AB12-CD34"));
        assert!(validate_format("ab12cd34"));
        assert!(!validate_format("AB12-CD3"));
        assert!(!validate_format("AB12_CD34"));
        assert!(!validate_format(PHRASE));
    }

    #[test]
    fn classify_accepts_code_or_phrase() {
        assert_eq!(
            classify(" ab12cd34 ").unwrap(),
            JoinInput::InviteCode("AB12-CD34".to_string())
        );
        assert_eq!(
            classify(&PHRASE.to_uppercase()).unwrap(),
            JoinInput::RecoveryPhrase(RecoveryPhrase::parse(PHRASE).unwrap())
        );
        assert!(matches!(classify("hello"), Err(SyncError::Validation(_))));
    }

    #[test]
    fn url_round_trip() {
        let phrase = RecoveryPhrase::parse(PHRASE).unwrap();
        let url = invite_url("https://manylla.com/", "AB12-CD34", &phrase);
        assert_eq!(url, format!("https://manylla.com/sync/AB12-CD34#{PHRASE}"));

        let (code, parsed) = parse_invite_url(&url);
        assert_eq!(code.as_deref(), Some("AB12-CD34"));
        assert_eq!(parsed, Some(phrase));

        assert_eq!(parse_invite_url("https://manylla.com/sync/nope"), (None, None));
    }

    #[tokio::test]
    async fn generate_then_resolve() {
        let (codec, _, _) = codec();
        let phrase = RecoveryPhrase::parse(PHRASE).unwrap();
        let invite = codec.generate(&phrase).await.unwrap();
        assert_eq!(invite.expires_at - invite.created_at, 24 * HOUR);
        assert_eq!(invite.sync_id, phrase.sync_id());

        let lowered = invite.code.to_lowercase().replace('-', "");
        assert_eq!(codec.resolve(&lowered).await.unwrap(), phrase);
    }

    #[tokio::test]
    async fn resolve_after_window_is_expired_then_not_found() {
        let (codec, clock, store) = codec();
        let phrase = RecoveryPhrase::parse(PHRASE).unwrap();
        let invite = codec.generate(&phrase).await.unwrap();

        clock.advance_millis(24 * HOUR + 1);
        assert!(matches!(codec.resolve(&invite.code).await, Err(SyncError::Expired(_))));
        assert!(matches!(codec.resolve(&invite.code).await, Err(SyncError::NotFound(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn unknown_code_is_not_found() {
        let (codec, _, _) = codec();
        assert!(matches!(codec.resolve("AAAA-BBBB").await, Err(SyncError::NotFound(_))));
        assert!(matches!(codec.resolve("AAAA").await, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn cleanup_drops_only_expired() {
        let (codec, clock, _) = codec();
        let old = RecoveryPhrase::parse(PHRASE).unwrap();
        codec.generate(&old).await.unwrap();
        clock.advance_millis(20 * HOUR);
        let fresh = RecoveryPhrase::parse("ffffffffffffffffffffffffffffffff").unwrap();
        let fresh_invite = codec.generate(&fresh).await.unwrap();
        clock.advance_millis(5 * HOUR);

        assert_eq!(codec.cleanup_expired().await.unwrap(), 1);
        assert_eq!(codec.resolve(&fresh_invite.code).await.unwrap(), fresh);
    }
}
