//! LastWill Inheritance Module
//!
//! Seals an owner's payload so that it opens only for the recipient, and only
//! once a threshold of keepers has disclosed their key parts.
//!
//! # Layers
//!
//! ```text
//! payload
//!   └─ ecies::encrypt(recipient)       only the recipient can open
//!        └─ AES-256-CTR(key, counter)  only with `threshold` key parts
//!
//! key ── split(n = keepers, k = threshold)
//!          └─ share i ── ecies::encrypt(keeper i)   only keeper i can open
//! ```
//!
//! The [`LegacyEnvelope`] is what the owner commits to the ledger. Its
//! Keccak-256 commitments let the ledger (and each keeper) verify a disclosed
//! key part and the recovered payload without seeing either in advance.

pub mod envelope;
pub mod recovery;

pub use envelope::{LegacyEnvelope, COUNTER_LEN, DEFAULT_MAX_CHUNK_LEN, KEY_LEN};
pub use recovery::{
    decrypt_key_part, decrypt_legacy, diagnose_failure, encrypt_legacy, encrypt_legacy_chunked,
    verify_key_part, FailureHint,
};

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("At least one keeper is required")]
    NoKeepers,
    #[error("Payload is empty")]
    EmptyPayload,
    #[error("Invalid threshold {threshold} for {keepers} keeper(s)")]
    InvalidThreshold { threshold: usize, keepers: usize },
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    /// Any failure while recovering the payload. Deliberately opaque: too few
    /// key parts and tampered data look the same.
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("No key part for keeper {index} ({available} available)")]
    KeyPartMissing { index: usize, available: usize },
    #[error("Key part decryption failed: {0}")]
    KeyPartDecryption(String),
}
