//! Commitment hashes
//!
//! Keccak-256, the digest EVM-style ledgers compute natively, so a commitment
//! recorded on the ledger can be checked there without revealing the data.

use sha3::{Digest, Keccak256};

/// A 32-byte digest.
pub type Hash32 = [u8; 32];

/// Keccak-256 of `data`.
pub fn keccak256(data: &[u8]) -> Hash32 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_empty_vector() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak_known_vector() {
        // keccak256("hello")
        assert_eq!(
            hex::encode(keccak256(b"hello")),
            "1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
        );
    }

    #[test]
    fn test_different_inputs() {
        assert_ne!(keccak256(b"a"), keccak256(b"b"));
    }
}
