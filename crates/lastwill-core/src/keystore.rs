//! Keeper keypair at rest
//!
//! The keeper's keypair is generated once and reused for the life of the
//! keeper identity. It is stored as JSON; the private key is either plain hex
//! or, when a passphrase is configured, encrypted with Argon2id + AES-256-GCM.
//!
//! # Security Notes
//!
//! - Argon2id is memory-hard (resistant to GPU/ASIC attacks)
//! - Each encryption uses a fresh random salt and nonce
//! - The passphrase is never stored

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::keys::KeyPair;
use crate::wire::{self, serde_hex};

/// Argon2id parameters (OWASP recommendations for 2024+)
const ARGON2_M_COST: u32 = 65536; // 64 MiB
const ARGON2_T_COST: u32 = 3;
const ARGON2_P_COST: u32 = 4;
const ARGON2_OUTPUT_LEN: usize = 32;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

const KEYSTORE_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported keystore version: {0}")]
    UnsupportedVersion(u32),
    #[error("Keystore is encrypted, a passphrase is required")]
    PassphraseRequired,
    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("Wrong passphrase or corrupted keystore")]
    DecryptionFailed,
    #[error("Invalid key material: {0}")]
    InvalidKey(String),
    #[error("Stored public key does not match the private key")]
    PublicKeyMismatch,
}

/// Encrypted private key: Argon2id salt, AES-GCM nonce, ciphertext + tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedKey {
    #[serde(with = "serde_hex")]
    pub salt: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub nonce: Vec<u8>,
    #[serde(with = "serde_hex")]
    pub ciphertext: Vec<u8>,
}

/// On-disk keystore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keystore {
    pub version: u32,
    /// Compressed public key, prefixed hex
    pub public_key: String,
    /// Plain private key (prefixed hex) when no passphrase is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_private_key: Option<EncryptedKey>,
}

/// Derive an encryption key from a passphrase using Argon2id
fn derive_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; ARGON2_OUTPUT_LEN]>, KeystoreError> {
    let params = Params::new(
        ARGON2_M_COST,
        ARGON2_T_COST,
        ARGON2_P_COST,
        Some(ARGON2_OUTPUT_LEN),
    )
    .map_err(|e| KeystoreError::KeyDerivationFailed(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; ARGON2_OUTPUT_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| KeystoreError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

impl Keystore {
    /// Build a keystore for `keypair`, encrypting the private key when a
    /// passphrase is given.
    pub fn new(keypair: &KeyPair, passphrase: Option<&str>) -> Result<Self, KeystoreError> {
        let secret = Zeroizing::new(keypair.secret_key().secret_bytes());

        let (private_key, encrypted_private_key) = match passphrase {
            None => (Some(wire::to_hex(&secret[..])), None),
            Some(passphrase) => {
                let mut salt = vec![0u8; SALT_LEN];
                OsRng.fill_bytes(&mut salt);
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

                let key = derive_key(passphrase, &salt)?;
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
                let ciphertext = cipher
                    .encrypt(&nonce, secret.as_slice())
                    .map_err(|e| KeystoreError::EncryptionFailed(e.to_string()))?;

                let encrypted = EncryptedKey {
                    salt,
                    nonce: nonce.to_vec(),
                    ciphertext,
                };
                (None, Some(encrypted))
            }
        };

        Ok(Self {
            version: KEYSTORE_VERSION,
            public_key: keypair.public_hex(),
            private_key,
            encrypted_private_key,
        })
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted_private_key.is_some()
    }

    /// Recover the keypair. The passphrase is ignored for plain keystores.
    pub fn unlock(&self, passphrase: Option<&str>) -> Result<KeyPair, KeystoreError> {
        if self.version != KEYSTORE_VERSION {
            return Err(KeystoreError::UnsupportedVersion(self.version));
        }

        let secret: Zeroizing<Vec<u8>> = match (&self.private_key, &self.encrypted_private_key) {
            (_, Some(encrypted)) => {
                let passphrase = passphrase.ok_or(KeystoreError::PassphraseRequired)?;
                if encrypted.nonce.len() != NONCE_LEN {
                    return Err(KeystoreError::DecryptionFailed);
                }
                let key = derive_key(passphrase, &encrypted.salt)?;
                let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key[..]));
                let plaintext = cipher
                    .decrypt(
                        Nonce::from_slice(&encrypted.nonce),
                        encrypted.ciphertext.as_slice(),
                    )
                    .map_err(|_| KeystoreError::DecryptionFailed)?;
                Zeroizing::new(plaintext)
            }
            (Some(plain), None) => Zeroizing::new(
                wire::from_hex(plain).map_err(|e| KeystoreError::InvalidKey(e.to_string()))?,
            ),
            (None, None) => {
                return Err(KeystoreError::InvalidKey("no private key stored".into()));
            }
        };

        let keypair = KeyPair::from_secret_bytes(&secret)
            .map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;

        let stored_public = wire::from_hex(&self.public_key)
            .map_err(|e| KeystoreError::InvalidKey(e.to_string()))?;
        if stored_public != keypair.public_key().serialize() {
            return Err(KeystoreError::PublicKeyMismatch);
        }

        Ok(keypair)
    }

    pub fn load(path: &Path) -> Result<Self, KeystoreError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), KeystoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let mut file = open_private(path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Open `path` for writing, readable by the owner only.
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

/// Load the keypair at `path`, or generate and persist a new one if the file
/// does not exist yet.
pub fn load_or_generate(path: &Path, passphrase: Option<&str>) -> Result<KeyPair, KeystoreError> {
    if path.exists() {
        let keypair = Keystore::load(path)?.unlock(passphrase)?;
        log::info!("Loaded keeper key {}", keypair.public_hex());
        return Ok(keypair);
    }

    let keypair = KeyPair::generate();
    Keystore::new(&keypair, passphrase)?.save(path)?;
    log::info!(
        "Generated new keeper key {} ({})",
        keypair.public_hex(),
        if passphrase.is_some() {
            "encrypted"
        } else {
            "unencrypted"
        }
    );
    Ok(keypair)
}
