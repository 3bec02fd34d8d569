//! lastwill Core
//!
//! Shared primitives for lastwill.
//!
//! # Contents
//!
//! - [`keys`]: secp256k1 identities (owner, recipient, keeper)
//! - [`ecies`]: hybrid "seal for a recipient" encryption
//! - [`packing`]: length-prefixed packing of opaque byte blobs
//! - [`hash`]: Keccak-256 commitment hashes, verifiable by the ledger
//! - [`wire`]: `0x`-prefixed hex, the encoding used across the ledger boundary
//! - [`keystore`]: the keeper keypair at rest (optionally Argon2id + AES-256-GCM)
//! - [`memory`]: process hardening for key material

pub mod ecies;
pub mod hash;
pub mod keys;
pub mod keystore;
pub mod memory;
pub mod packing;
pub mod wire;

pub use ecies::{AsymmetricCiphertext, EciesError};
pub use hash::{keccak256, Hash32};
pub use keys::{KeyError, KeyPair};
pub use keystore::{Keystore, KeystoreError};
pub use packing::{pack, pack_elliptic, unpack, unpack_elliptic, PackError};
