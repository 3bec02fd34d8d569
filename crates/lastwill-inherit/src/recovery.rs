//! Building and opening a legacy
//!
//! The owner calls [`encrypt_legacy`] once. Each keeper later calls
//! [`decrypt_key_part`] on its own sealed part and discloses it; the recipient
//! then runs [`decrypt_legacy`] over the disclosed parts.

use std::fmt;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use lastwill_core::hash::keccak256;
use lastwill_core::{ecies, packing};
use lastwill_shamir::{self as shamir, Share};
use rand::rngs::OsRng;
use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::envelope::{LegacyEnvelope, COUNTER_LEN, DEFAULT_MAX_CHUNK_LEN, KEY_LEN};
use crate::RecoveryError;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

fn apply_ctr(key: &[u8], counter: &[u8; COUNTER_LEN], data: &mut [u8]) -> Result<(), String> {
    let mut cipher = Aes256Ctr::new_from_slices(key, counter).map_err(|e| e.to_string())?;
    cipher.apply_keystream(data);
    Ok(())
}

fn encryption_failed<E: fmt::Display>(e: E) -> RecoveryError {
    RecoveryError::EncryptionFailed(e.to_string())
}

/// Collapse every recovery failure into the single opaque error, keeping the
/// cause in the debug log only.
fn opaque<E: fmt::Display>(stage: &'static str) -> impl Fn(E) -> RecoveryError {
    move |e| {
        log::debug!("Legacy recovery failed at {}: {}", stage, e);
        RecoveryError::DecryptionFailed
    }
}

/// Seal `payload` for `recipient`, with the unlocking key split across
/// `keepers` so that any `threshold` of them can release it.
///
/// Uses [`DEFAULT_MAX_CHUNK_LEN`] for the key-part chunks.
///
/// The sealed payload travels as one packed segment, so `payload` must be
/// non-empty and shorter than [`packing::MAX_SEGMENT_LEN`] bytes. An empty
/// payload gives [`RecoveryError::EmptyPayload`]; an oversized one gives
/// [`RecoveryError::EncryptionFailed`].
pub fn encrypt_legacy(
    payload: &[u8],
    recipient: &PublicKey,
    keepers: &[PublicKey],
    threshold: usize,
) -> Result<LegacyEnvelope, RecoveryError> {
    encrypt_legacy_chunked(payload, recipient, keepers, threshold, DEFAULT_MAX_CHUNK_LEN)
}

/// [`encrypt_legacy`] with an explicit bound on each key-part chunk.
pub fn encrypt_legacy_chunked(
    payload: &[u8],
    recipient: &PublicKey,
    keepers: &[PublicKey],
    threshold: usize,
    max_chunk_len: usize,
) -> Result<LegacyEnvelope, RecoveryError> {
    if payload.is_empty() {
        return Err(RecoveryError::EmptyPayload);
    }
    if keepers.is_empty() {
        return Err(RecoveryError::NoKeepers);
    }
    if threshold < 2 || threshold > keepers.len() || keepers.len() > shamir::MAX_SHARES as usize {
        return Err(RecoveryError::InvalidThreshold {
            threshold,
            keepers: keepers.len(),
        });
    }

    let payload_hash = keccak256(payload);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(&mut key[..]);
    let mut aes_counter = [0u8; COUNTER_LEN];
    OsRng.fill_bytes(&mut aes_counter);

    let sealed = ecies::encrypt(payload, recipient).map_err(encryption_failed)?;
    let mut encrypted_payload = packing::pack_elliptic(&sealed).map_err(encryption_failed)?;
    apply_ctr(&key[..], &aes_counter, &mut encrypted_payload).map_err(encryption_failed)?;

    let shares = shamir::split(&key[..], keepers.len() as u16, threshold as u16)
        .map_err(encryption_failed)?;
    let encoded: Vec<Zeroizing<Vec<u8>>> = shares
        .iter()
        .map(|share| Zeroizing::new(share.to_bytes()))
        .collect();
    drop(shares);

    let share_length = encoded.iter().map(|s| s.len()).max().unwrap_or(0);

    let mut key_part_hashes = Vec::with_capacity(keepers.len());
    let mut sealed_parts = Vec::with_capacity(keepers.len());
    for (share, keeper) in encoded.iter().zip(keepers) {
        let mut padded = Zeroizing::new(share.to_vec());
        padded.resize(share_length, 0);

        key_part_hashes.push(keccak256(&padded));
        let sealed = ecies::encrypt(&padded, keeper).map_err(encryption_failed)?;
        sealed_parts.push(packing::pack_elliptic(&sealed).map_err(encryption_failed)?);
    }

    let key_part_chunks =
        packing::pack_chunked(&sealed_parts, max_chunk_len).map_err(encryption_failed)?;

    log::debug!(
        "Built legacy: {}-of-{} keepers, {} chunk(s), share length {}",
        threshold,
        keepers.len(),
        key_part_chunks.len(),
        share_length
    );

    Ok(LegacyEnvelope {
        encrypted_payload,
        aes_counter,
        payload_hash,
        share_length,
        key_part_hashes,
        key_part_chunks,
    })
}

/// Recover the payload from disclosed key parts.
///
/// `key_parts` are the padded parts as keepers disclosed them, in any order.
///
/// # Errors
/// [`RecoveryError::DecryptionFailed`] for every failure, including too few
/// key parts. Use [`diagnose_failure`] to pick a user-facing explanation.
pub fn decrypt_legacy<S: AsRef<[u8]>>(
    envelope: &LegacyEnvelope,
    recipient: &SecretKey,
    key_parts: &[S],
) -> Result<Vec<u8>, RecoveryError> {
    let shares = key_parts
        .iter()
        .map(|part| {
            let part = part.as_ref();
            Share::from_bytes(&part[..part.len().min(envelope.share_length)])
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(opaque("decoding key parts"))?;

    let key = Zeroizing::new(shamir::combine(&shares).map_err(opaque("combining key parts"))?);
    if key.len() != KEY_LEN {
        return Err(opaque("combining key parts")(format!(
            "recovered key is {} bytes",
            key.len()
        )));
    }

    let mut packed = envelope.encrypted_payload.clone();
    apply_ctr(&key, &envelope.aes_counter, &mut packed).map_err(opaque("symmetric layer"))?;

    let sealed = packing::unpack_elliptic(&packed).map_err(opaque("unpacking payload"))?;
    let payload = ecies::decrypt(&sealed, recipient).map_err(opaque("recipient layer"))?;

    if keccak256(&payload) != envelope.payload_hash {
        return Err(opaque("payload commitment")("hash mismatch"));
    }

    Ok(payload)
}

/// Open this keeper's own sealed key part.
///
/// `chunks` are the envelope's key-part chunks in ledger order.
pub fn decrypt_key_part<C: AsRef<[u8]>>(
    chunks: &[C],
    keeper_index: usize,
    keeper_secret: &SecretKey,
) -> Result<Zeroizing<Vec<u8>>, RecoveryError> {
    let parts = packing::unpack_chunks(chunks)
        .map_err(|e| RecoveryError::KeyPartDecryption(e.to_string()))?;
    let part = parts
        .get(keeper_index)
        .ok_or(RecoveryError::KeyPartMissing {
            index: keeper_index,
            available: parts.len(),
        })?;

    let sealed = packing::unpack_elliptic(part)
        .map_err(|e| RecoveryError::KeyPartDecryption(e.to_string()))?;
    let share = ecies::decrypt(&sealed, keeper_secret)
        .map_err(|e| RecoveryError::KeyPartDecryption(e.to_string()))?;

    Ok(Zeroizing::new(share))
}

/// Check a (padded) key part against the envelope's commitment.
pub fn verify_key_part(envelope: &LegacyEnvelope, keeper_index: usize, key_part: &[u8]) -> bool {
    envelope
        .key_part_hash(keeper_index)
        .is_some_and(|hash| *hash == keccak256(key_part))
}

/// Best guess at why [`decrypt_legacy`] failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureHint {
    /// Fewer key parts than the threshold were available
    NotEnoughKeyParts { supplied: usize, threshold: usize },
    /// Enough key parts, so something was altered or mis-addressed
    PossiblyTampered { supplied: usize, total: usize },
}

impl fmt::Display for FailureHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureHint::NotEnoughKeyParts {
                supplied,
                threshold,
            } => write!(
                f,
                "only {} of the {} required key parts have been disclosed",
                supplied, threshold
            ),
            FailureHint::PossiblyTampered { supplied, total } => write!(
                f,
                "{} of {} key parts were disclosed but the legacy did not open; the data may have been tampered with",
                supplied, total
            ),
        }
    }
}

/// Count heuristic for a failed recovery.
pub fn diagnose_failure(supplied: usize, total_keepers: usize, threshold: usize) -> FailureHint {
    if supplied < threshold {
        FailureHint::NotEnoughKeyParts {
            supplied,
            threshold,
        }
    } else {
        FailureHint::PossiblyTampered {
            supplied,
            total: total_keepers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastwill_core::KeyPair;

    struct Setup {
        recipient: KeyPair,
        keepers: Vec<KeyPair>,
        envelope: LegacyEnvelope,
    }

    fn setup(payload: &[u8], keepers: usize, threshold: usize, max_chunk_len: usize) -> Setup {
        let recipient = KeyPair::generate();
        let keepers: Vec<KeyPair> = (0..keepers).map(|_| KeyPair::generate()).collect();
        let publics: Vec<PublicKey> = keepers.iter().map(|k| *k.public_key()).collect();
        let envelope = encrypt_legacy_chunked(
            payload,
            recipient.public_key(),
            &publics,
            threshold,
            max_chunk_len,
        )
        .unwrap();
        Setup {
            recipient,
            keepers,
            envelope,
        }
    }

    fn disclose(setup: &Setup, indices: &[usize]) -> Vec<Vec<u8>> {
        indices
            .iter()
            .map(|&i| {
                decrypt_key_part(
                    &setup.envelope.key_part_chunks,
                    i,
                    setup.keepers[i].secret_key(),
                )
                .unwrap()
                .to_vec()
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_any_threshold_subset() {
        let payload = b"seed words live in the blue notebook";
        let s = setup(payload, 5, 3, DEFAULT_MAX_CHUNK_LEN);

        assert_eq!(s.envelope.keeper_count(), 5);
        assert_eq!(s.envelope.payload_hash, keccak256(payload));

        for subset in [[0, 1, 2], [2, 3, 4], [4, 0, 2]] {
            let parts = disclose(&s, &subset);
            let recovered = decrypt_legacy(&s.envelope, s.recipient.secret_key(), &parts).unwrap();
            assert_eq!(recovered, payload);
        }

        let all = disclose(&s, &[0, 1, 2, 3, 4]);
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &all).unwrap(),
            payload
        );
    }

    #[test]
    fn test_below_threshold_fails_opaquely() {
        let s = setup(b"payload", 5, 3, DEFAULT_MAX_CHUNK_LEN);
        let parts = disclose(&s, &[1, 3]);
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &parts),
            Err(RecoveryError::DecryptionFailed)
        );
        assert_eq!(
            diagnose_failure(parts.len(), 5, 3),
            FailureHint::NotEnoughKeyParts {
                supplied: 2,
                threshold: 3
            }
        );
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let s = setup(b"payload", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        let parts = disclose(&s, &[0, 1]);
        let eve = KeyPair::generate();
        assert_eq!(
            decrypt_legacy(&s.envelope, eve.secret_key(), &parts),
            Err(RecoveryError::DecryptionFailed)
        );
    }

    #[test]
    fn test_tampering_is_detected() {
        let s = setup(b"payload", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        let parts = disclose(&s, &[0, 2]);

        let mut envelope = s.envelope.clone();
        envelope.encrypted_payload[40] ^= 0x01;
        assert_eq!(
            decrypt_legacy(&envelope, s.recipient.secret_key(), &parts),
            Err(RecoveryError::DecryptionFailed)
        );

        let mut envelope = s.envelope.clone();
        envelope.payload_hash[0] ^= 0x01;
        assert_eq!(
            decrypt_legacy(&envelope, s.recipient.secret_key(), &parts),
            Err(RecoveryError::DecryptionFailed)
        );

        let mut bad_parts = parts.clone();
        bad_parts[1][5] ^= 0x10;
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &bad_parts),
            Err(RecoveryError::DecryptionFailed)
        );
        assert_eq!(
            diagnose_failure(bad_parts.len(), 3, 2),
            FailureHint::PossiblyTampered {
                supplied: 2,
                total: 3
            }
        );
    }

    #[test]
    fn test_key_parts_are_padded_and_committed() {
        let s = setup(b"payload", 4, 2, DEFAULT_MAX_CHUNK_LEN);
        let parts = disclose(&s, &[0, 1, 2, 3]);

        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.len(), s.envelope.share_length);
            assert!(verify_key_part(&s.envelope, i, part));
        }
        assert!(!verify_key_part(&s.envelope, 0, &parts[1]));
        assert!(!verify_key_part(&s.envelope, 9, &parts[0]));
    }

    #[test]
    fn test_trailing_padding_is_trimmed() {
        let s = setup(b"payload", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        let mut parts = disclose(&s, &[0, 1]);
        for part in &mut parts {
            part.extend_from_slice(&[0, 0, 0, 0]);
        }
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &parts).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn test_small_chunks() {
        let s = setup(b"chunked", 6, 4, 200);
        assert!(s.envelope.key_part_chunks.len() > 1);
        assert!(s.envelope.key_part_chunks.iter().all(|c| c.len() <= 200));

        let parts = disclose(&s, &[5, 1, 3, 0]);
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &parts).unwrap(),
            b"chunked"
        );
    }

    #[test]
    fn test_key_part_access_errors() {
        let s = setup(b"payload", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        assert!(matches!(
            decrypt_key_part(&s.envelope.key_part_chunks, 3, s.keepers[0].secret_key()),
            Err(RecoveryError::KeyPartMissing {
                index: 3,
                available: 3
            })
        ));
        assert!(matches!(
            decrypt_key_part(&s.envelope.key_part_chunks, 0, s.keepers[1].secret_key()),
            Err(RecoveryError::KeyPartDecryption(_))
        ));
    }

    #[test]
    fn test_invalid_parameters() {
        let recipient = KeyPair::generate();
        let keeper = *KeyPair::generate().public_key();

        assert_eq!(
            encrypt_legacy(b"x", recipient.public_key(), &[], 2),
            Err(RecoveryError::NoKeepers)
        );
        assert_eq!(
            encrypt_legacy(b"x", recipient.public_key(), &[keeper, keeper], 1),
            Err(RecoveryError::InvalidThreshold {
                threshold: 1,
                keepers: 2
            })
        );
        assert!(matches!(
            encrypt_legacy(b"x", recipient.public_key(), &[keeper, keeper], 3),
            Err(RecoveryError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_empty_payload_rejected() {
        let recipient = KeyPair::generate();
        let keepers: Vec<PublicKey> = (0..3).map(|_| *KeyPair::generate().public_key()).collect();
        assert_eq!(
            encrypt_legacy(b"", recipient.public_key(), &keepers, 2),
            Err(RecoveryError::EmptyPayload)
        );
    }

    #[test]
    fn test_payload_size_limit() {
        let recipient = KeyPair::generate();
        let keepers: Vec<PublicKey> = (0..3).map(|_| *KeyPair::generate().public_key()).collect();

        let largest = vec![0x5Au8; packing::MAX_SEGMENT_LEN - 1];
        assert!(encrypt_legacy(&largest, recipient.public_key(), &keepers, 2).is_ok());

        let too_large = vec![0x5Au8; packing::MAX_SEGMENT_LEN];
        assert!(matches!(
            encrypt_legacy(&too_large, recipient.public_key(), &keepers, 2),
            Err(RecoveryError::EncryptionFailed(_))
        ));
    }

    #[test]
    fn test_single_byte_payload_recovers() {
        let s = setup(b"!", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        let parts = disclose(&s, &[0, 2]);
        assert_eq!(
            decrypt_legacy(&s.envelope, s.recipient.secret_key(), &parts).unwrap(),
            b"!"
        );
    }

    #[test]
    fn test_envelope_json_roundtrip() {
        let s = setup(b"json", 3, 2, DEFAULT_MAX_CHUNK_LEN);
        let json = serde_json::to_value(&s.envelope).unwrap();
        assert!(json["payload_hash"].as_str().unwrap().starts_with("0x"));
        let back: LegacyEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, s.envelope);
    }
}
