//! LastWill Shamir Module
//!
//! Threshold splitting of the legacy's symmetric key across keepers.
//!
//! Works over GF(2^14): up to 16383 shares of an arbitrary-length secret.
//! Any `threshold` shares reconstruct the secret; fewer reveal nothing about
//! it. Reconstruction never detects wrong or missing shares by itself, so
//! callers verify the result against a commitment.
//!
//! # Example
//!
//! ```
//! use lastwill_shamir::{combine, split, Share};
//!
//! let key = [0x42u8; 32];
//! let shares = split(&key, 5, 3).unwrap();
//!
//! // Shares travel as strings ...
//! let encoded: Vec<String> = shares.iter().map(|s| s.to_string()).collect();
//!
//! // ... and any 3 of them recover the key
//! let parsed: Vec<Share> = encoded[1..4].iter().map(|s| s.parse().unwrap()).collect();
//! assert_eq!(combine(&parsed).unwrap(), key);
//! ```

pub mod gf16384;
pub mod shamir;
pub mod shares;

// Re-exports
pub use shamir::{combine, split, Share, MAX_SHARES};
pub use shares::parse_share;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShamirError {
    #[error("Invalid threshold: need at least 2")]
    InvalidThreshold,
    #[error("Threshold exceeds share count")]
    ThresholdExceedsShares,
    #[error("Too many shares: {0} (max {MAX_SHARES})")]
    TooManyShares(u16),
    #[error("Cannot split an empty secret")]
    EmptySecret,
    #[error("No shares to reconstruct from")]
    InsufficientShares,
    #[error("Invalid share format: {0}")]
    InvalidShare(String),
}
