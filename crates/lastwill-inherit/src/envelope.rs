//! The committed, recoverable record

use lastwill_core::hash::Hash32;
use lastwill_core::wire::{serde_hex, serde_hex_array, serde_hex_list};
use serde::{Deserialize, Serialize};

/// AES-256 key size
pub const KEY_LEN: usize = 32;

/// AES-CTR initial counter block size
pub const COUNTER_LEN: usize = 16;

/// Default upper bound on one stored key-part chunk.
pub const DEFAULT_MAX_CHUNK_LEN: usize = 4096;

/// Everything the owner commits to the ledger for one legacy.
///
/// Immutable once built. `key_part_chunks` may be empty when the envelope was
/// read back from a ledger that serves the chunks separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyEnvelope {
    /// Recipient-sealed payload under the AES-CTR layer
    #[serde(with = "serde_hex")]
    pub encrypted_payload: Vec<u8>,
    #[serde(with = "serde_hex_array")]
    pub aes_counter: [u8; COUNTER_LEN],
    /// Keccak-256 of the plain payload
    #[serde(with = "serde_hex_array")]
    pub payload_hash: Hash32,
    /// Byte length every padded key part shares
    pub share_length: usize,
    /// Keccak-256 of each keeper's padded key part, in keeper order
    #[serde(with = "serde_hex_list")]
    pub key_part_hashes: Vec<Hash32>,
    /// Keeper-sealed key parts, packed into length-bounded chunks
    #[serde(with = "serde_hex_list", default)]
    pub key_part_chunks: Vec<Vec<u8>>,
}

impl LegacyEnvelope {
    pub fn keeper_count(&self) -> usize {
        self.key_part_hashes.len()
    }

    pub fn key_part_hash(&self, keeper_index: usize) -> Option<&Hash32> {
        self.key_part_hashes.get(keeper_index)
    }
}
