//! Core Shamir's Secret Sharing implementation
//!
//! Split a secret into N shares where any M can reconstruct it.
//!
//! The secret is turned into a string of 14-bit field words: a single `1`
//! marker bit is prepended to the secret's bits and the result is left-padded
//! with zeros to a whole number of words. Every word gets its own random
//! polynomial of degree M-1. The marker lets reconstruction strip the padding
//! without knowing the secret's length, so leading zero bytes survive.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::gf16384::{self, lagrange_interpolate, poly_eval, BITS, MAX_ELEMENT};
use crate::ShamirError;

/// Largest number of shares a secret can be split into (and the largest id)
pub const MAX_SHARES: u16 = MAX_ELEMENT;

/// A single share of a secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Field size in bits; always [`BITS`] for shares produced here
    pub bits: u8,
    /// Share id (1..=MAX_SHARES, never 0)
    pub id: u16,
    /// One field word per secret word
    pub data: Vec<u16>,
}

/// Secret bytes -> marker bit + secret bits, left-padded to whole words.
fn bytes_to_words(secret: &[u8]) -> Vec<u16> {
    let word_bits = BITS as usize;
    let total_bits = 1 + secret.len() * 8;
    let padding = (word_bits - total_bits % word_bits) % word_bits;

    let bits = std::iter::repeat(false)
        .take(padding)
        .chain(std::iter::once(true))
        .chain(
            secret
                .iter()
                .flat_map(|byte| (0..8).rev().map(move |i| (byte >> i) & 1 == 1)),
        );

    let mut words = Vec::with_capacity((padding + total_bits) / word_bits);
    let mut word = 0u16;
    for (n, bit) in bits.enumerate() {
        word = (word << 1) | bit as u16;
        if (n + 1) % word_bits == 0 {
            words.push(word);
            word = 0;
        }
    }
    words
}

/// Inverse of [`bytes_to_words`]: drop leading zeros and the marker bit, then
/// left-pad the remaining bits to whole bytes. No marker yields no bytes.
fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let bits: Vec<bool> = words
        .iter()
        .flat_map(|&w| (0..BITS).rev().map(move |i| (w >> i) & 1 == 1))
        .skip_while(|bit| !bit)
        .skip(1)
        .collect();

    let padding = (8 - bits.len() % 8) % 8;
    let mut bytes = Vec::with_capacity((bits.len() + padding) / 8);
    let mut byte = 0u8;
    for (n, bit) in std::iter::repeat(false)
        .take(padding)
        .chain(bits)
        .enumerate()
    {
        byte = (byte << 1) | bit as u8;
        if (n + 1) % 8 == 0 {
            bytes.push(byte);
            byte = 0;
        }
    }
    bytes
}

/// Split a secret into `total` shares, any `threshold` of which reconstruct it.
///
/// Share ids are 1..=total.
pub fn split(secret: &[u8], total: u16, threshold: u16) -> Result<Vec<Share>, ShamirError> {
    if threshold < 2 {
        return Err(ShamirError::InvalidThreshold);
    }
    if threshold > total {
        return Err(ShamirError::ThresholdExceedsShares);
    }
    if total > MAX_SHARES {
        return Err(ShamirError::TooManyShares(total));
    }
    if secret.is_empty() {
        return Err(ShamirError::EmptySecret);
    }

    let words = bytes_to_words(secret);
    let mut rng = rand::thread_rng();
    let mut shares: Vec<Share> = (1..=total)
        .map(|id| Share {
            bits: BITS,
            id,
            data: Vec::with_capacity(words.len()),
        })
        .collect();

    for &word in &words {
        // p(x) = word + c1*x + ... + c_{t-1}*x^{t-1}
        let mut coefficients = Vec::with_capacity(threshold as usize);
        coefficients.push(word);
        for _ in 1..threshold {
            coefficients.push((rng.next_u32() as u16) & MAX_ELEMENT);
        }

        for share in &mut shares {
            share.data.push(poly_eval(&coefficients, share.id));
        }
    }

    Ok(shares)
}

/// Reconstruct a secret from shares.
///
/// Shares with a repeated id are ignored after the first. Shorter shares are
/// left-padded with zero words. Passing fewer shares than the threshold, or
/// shares from a different split, does not fail: it yields a wrong secret.
pub fn combine(shares: &[Share]) -> Result<Vec<u8>, ShamirError> {
    if shares.is_empty() {
        return Err(ShamirError::InsufficientShares);
    }

    let mut unique: Vec<&Share> = Vec::with_capacity(shares.len());
    for share in shares {
        if share.bits != BITS {
            return Err(ShamirError::InvalidShare(format!(
                "mixed field sizes: {} bits, expected {}",
                share.bits, BITS
            )));
        }
        if share.id == 0 || share.id > MAX_SHARES {
            return Err(ShamirError::InvalidShare(format!("id {} out of range", share.id)));
        }
        if !unique.iter().any(|s| s.id == share.id) {
            unique.push(share);
        }
    }

    let len = unique.iter().map(|s| s.data.len()).max().unwrap_or(0);
    let word_at = |share: &Share, position: usize| -> u16 {
        let offset = len - share.data.len();
        if position < offset {
            0
        } else {
            share.data[position - offset] & gf16384::MAX_ELEMENT
        }
    };

    let words: Vec<u16> = (0..len)
        .map(|position| {
            let points: Vec<(u16, u16)> = unique
                .iter()
                .map(|&s| (s.id, word_at(s, position)))
                .collect();
            lagrange_interpolate(&points)
        })
        .collect();

    Ok(words_to_bytes(&words))
}
