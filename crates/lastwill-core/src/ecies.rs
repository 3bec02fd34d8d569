//! Elliptic-curve hybrid encryption ("seal for a recipient").
//!
//! # Construction
//!
//! 1. Fresh ephemeral secp256k1 keypair per message
//! 2. ECDH with the recipient's public key; SHA-512 of the shared x-coordinate
//! 3. First 32 bytes: AES-256-CTR key, last 32 bytes: HMAC-SHA256 key
//! 4. `mac = HMAC(iv || ephemeral_public_key || ciphertext)`
//!
//! Decryption checks the MAC (constant time) before touching the ciphertext.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secp256k1::{ecdh, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::Zeroizing;

use crate::packing::{self, PackError};
use crate::wire::serde_hex;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// AES block / counter size
pub const IV_LEN: usize = 16;

/// HMAC-SHA256 output size
pub const MAC_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EciesError {
    #[error("Authentication failed: MAC mismatch")]
    AuthenticationFailed,
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Pack error: {0}")]
    Pack(#[from] PackError),
}

/// One EC-sealed blob. All four fields are needed to decrypt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsymmetricCiphertext {
    #[serde(with = "serde_hex")]
    pub iv: Vec<u8>,
    /// Compressed ephemeral public key (33 bytes)
    #[serde(with = "serde_hex")]
    pub ephemeral_public_key: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub mac: Vec<u8>,
}

impl AsymmetricCiphertext {
    /// Serialize with [`packing::pack_elliptic`].
    pub fn to_bytes(&self) -> Result<Vec<u8>, EciesError> {
        Ok(packing::pack_elliptic(self)?)
    }

    /// Deserialize with [`packing::unpack_elliptic`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EciesError> {
        Ok(packing::unpack_elliptic(bytes)?)
    }
}

/// Derived symmetric keys, wiped on drop.
struct DerivedKeys {
    encryption: Zeroizing<[u8; 32]>,
    mac: Zeroizing<[u8; 32]>,
}

fn derive_keys(point: &PublicKey, scalar: &SecretKey) -> DerivedKeys {
    let shared = Zeroizing::new(ecdh::shared_secret_point(point, scalar));
    let mut digest = Zeroizing::new([0u8; 64]);
    digest.copy_from_slice(&Sha512::digest(&shared[..32]));

    let mut encryption = Zeroizing::new([0u8; 32]);
    let mut mac = Zeroizing::new([0u8; 32]);
    encryption.copy_from_slice(&digest[..32]);
    mac.copy_from_slice(&digest[32..]);
    DerivedKeys { encryption, mac }
}

fn compute_mac(
    key: &[u8; 32],
    iv: &[u8],
    ephemeral: &[u8],
    ciphertext: &[u8],
) -> Result<HmacSha256, String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|e| e.to_string())?;
    mac.update(iv);
    mac.update(ephemeral);
    mac.update(ciphertext);
    Ok(mac)
}

fn apply_ctr(key: &[u8; 32], iv: &[u8], data: &mut [u8]) -> Result<(), String> {
    let mut cipher = Aes256Ctr::new_from_slices(key, iv).map_err(|e| e.to_string())?;
    cipher.apply_keystream(data);
    Ok(())
}

/// Seal `plaintext` for the holder of `recipient`'s private key.
///
/// Non-deterministic: every call uses a new ephemeral key and iv.
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey) -> Result<AsymmetricCiphertext, EciesError> {
    let secp = Secp256k1::new();
    let (ephemeral_secret, ephemeral_public) = secp.generate_keypair(&mut rand::thread_rng());
    let keys = derive_keys(recipient, &ephemeral_secret);

    let mut iv = vec![0u8; IV_LEN];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let mut ciphertext = plaintext.to_vec();
    apply_ctr(&keys.encryption, &iv, &mut ciphertext).map_err(EciesError::EncryptionFailed)?;

    let ephemeral_public_key = ephemeral_public.serialize().to_vec();
    let mac = compute_mac(&keys.mac, &iv, &ephemeral_public_key, &ciphertext)
        .map_err(EciesError::EncryptionFailed)?
        .finalize()
        .into_bytes()
        .to_vec();

    Ok(AsymmetricCiphertext {
        iv,
        ephemeral_public_key,
        ciphertext,
        mac,
    })
}

/// Open a sealed blob with the recipient's private key.
///
/// # Errors
/// - [`EciesError::AuthenticationFailed`] if the MAC does not verify
///   (wrong key, or any of iv / ephemeral key / ciphertext altered)
/// - [`EciesError::DecryptionFailed`] on structurally invalid input
pub fn decrypt(ct: &AsymmetricCiphertext, recipient: &SecretKey) -> Result<Vec<u8>, EciesError> {
    let ephemeral = PublicKey::from_slice(&ct.ephemeral_public_key)
        .map_err(|e| EciesError::DecryptionFailed(format!("invalid ephemeral key: {}", e)))?;
    let keys = derive_keys(&ephemeral, recipient);

    compute_mac(&keys.mac, &ct.iv, &ct.ephemeral_public_key, &ct.ciphertext)
        .map_err(EciesError::DecryptionFailed)?
        .verify_slice(&ct.mac)
        .map_err(|_| EciesError::AuthenticationFailed)?;

    if ct.iv.len() != IV_LEN {
        return Err(EciesError::DecryptionFailed(format!(
            "iv must be {} bytes, got {}",
            IV_LEN,
            ct.iv.len()
        )));
    }

    let mut plaintext = ct.ciphertext.clone();
    apply_ctr(&keys.encryption, &ct.iv, &mut plaintext).map_err(EciesError::DecryptionFailed)?;
    Ok(plaintext)
}
