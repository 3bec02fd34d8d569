//! secp256k1 identities
//!
//! One keypair per owner/recipient and one per keeper. Public keys travel as
//! 33-byte compressed points; the 65-byte uncompressed form is accepted too.

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use thiserror::Error;

use crate::wire;

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),
}

/// An elliptic-curve identity.
#[derive(Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret, public) = secp.generate_keypair(&mut rand::thread_rng());
        Self { secret, public }
    }

    /// Rebuild a keypair from its 32-byte private scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| KeyError::InvalidPrivateKey(e.to_string()))?;
        let public = secret.public_key(&Secp256k1::new());
        Ok(Self { secret, public })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Compressed public key as prefixed hex.
    pub fn public_hex(&self) -> String {
        wire::to_hex(&self.public.serialize())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_hex())
            .finish_non_exhaustive()
    }
}

/// Parse a public key from raw compressed or uncompressed bytes.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, KeyError> {
    PublicKey::from_slice(bytes).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

/// Parse a public key from hex (`0x` optional).
pub fn parse_public_key_hex(s: &str) -> Result<PublicKey, KeyError> {
    let bytes = wire::from_hex(s).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
    parse_public_key(&bytes)
}
