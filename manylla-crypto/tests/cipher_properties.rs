use manylla_crypto::{
    CryptoError, DerivedKey, EncryptedBlob, EncryptionService, KdfParams, RecoveryPhrase,
    SecureRandom, decrypt, derive_key, encrypt,
};
use proptest::prelude::*;
use serde_json::json;

fn hex_phrase() -> impl Strategy<Value = String> {
    "[a-f0-9]{32}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn derive_key_is_deterministic(phrase in hex_phrase()) {
        let p = RecoveryPhrase::parse(&phrase).unwrap();
        let params = KdfParams::for_testing();
        let a = derive_key(&p, &params).unwrap();
        let b = derive_key(&p, &params).unwrap();
        prop_assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn sync_id_depends_only_on_phrase(phrase in hex_phrase()) {
        let upper = phrase.to_uppercase();
        let a = RecoveryPhrase::parse(&phrase).unwrap().sync_id();
        let b = RecoveryPhrase::parse(&upper).unwrap().sync_id();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn invalid_phrases_are_rejected(input in "[g-z]{1,40}|[a-f0-9]{0,31}|[a-f0-9]{33,40}") {
        prop_assert!(matches!(
            RecoveryPhrase::parse(&input),
            Err(CryptoError::InvalidRecoveryPhrase)
        ));
    }
}

proptest! {
    #[test]
    fn encrypt_then_decrypt_returns_plaintext(
        plaintext in proptest::collection::vec(any::<u8>(), 0..4096),
        key_bytes in any::<[u8; 32]>(),
    ) {
        let rng = SecureRandom::os();
        let key = DerivedKey::from_bytes(key_bytes);
        let blob = encrypt(&key, &plaintext, &rng).unwrap();
        let wire = blob.to_wire();
        let decoded = EncryptedBlob::from_wire(&wire).unwrap();
        prop_assert_eq!(decrypt(&key, &decoded).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_with_other_key_fails(
        plaintext in proptest::collection::vec(any::<u8>(), 1..512),
        k1 in any::<[u8; 32]>(),
        k2 in any::<[u8; 32]>(),
    ) {
        prop_assume!(k1 != k2);
        let rng = SecureRandom::os();
        let blob = encrypt(&DerivedKey::from_bytes(k1), &plaintext, &rng).unwrap();
        let result = decrypt(&DerivedKey::from_bytes(k2), &blob);
        prop_assert!(matches!(result, Err(CryptoError::Decryption(_))));
    }
}

#[test]
fn two_services_with_same_phrase_interoperate() {
    let phrase = RecoveryPhrase::generate(&SecureRandom::os()).unwrap();
    let params = KdfParams::for_testing();

    let device_a = EncryptionService::new(SecureRandom::os());
    device_a.unlock(derive_key(&phrase, &params).unwrap());
    let device_b = EncryptionService::new(SecureRandom::os());
    device_b.unlock(derive_key(&phrase, &params).unwrap());

    let wire = device_a.encrypt_payload(&json!({"name": "Alex"})).unwrap();
    let back: serde_json::Value = device_b.decrypt_payload(&wire).unwrap();
    assert_eq!(back, json!({"name": "Alex"}));
}

#[test]
fn truncated_wire_blob_never_decrypts_partially() {
    let rng = SecureRandom::os();
    let key = DerivedKey::from_bytes([7u8; 32]);
    let wire = encrypt(&key, b"medical history", &rng).unwrap().to_wire();

    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;
    let mut raw = engine.decode(&wire).unwrap();
    raw.truncate(raw.len() - 1);
    let truncated = engine.encode(raw);

    let blob = EncryptedBlob::from_wire(&truncated).unwrap();
    assert!(matches!(decrypt(&key, &blob), Err(CryptoError::Decryption(_))));
}
