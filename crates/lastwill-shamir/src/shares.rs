//! Share encodings
//!
//! Two interchangeable forms of the same share:
//!
//! - **string form**: one base-36 character for the field size, four hex
//!   digits of id, then four hex digits per data word (`e0001…`)
//! - **transport form**: even-length hex, so it can travel as raw bytes.
//!   The field-size character becomes a two-digit hex byte (`0e0001…`)
//!
//! The byte layout behind the transport form is
//!
//! ```text
//! [bits (1)][id (2, BE)][word_0 (2, BE)][word_1 (2, BE)]...
//! ```

use std::fmt;
use std::str::FromStr;

use lastwill_core::wire;

use crate::gf16384::BITS;
use crate::shamir::Share;
use crate::ShamirError;

const HEADER_LEN: usize = 3;

/// Field sizes a share string may declare
const MIN_BITS: u8 = 3;
const MAX_BITS: u8 = 20;

fn bits_char(bits: u8) -> Option<char> {
    std::char::from_digit(bits as u32, 36)
}

impl Share {
    /// Byte layout of the transport form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + 2 * self.data.len());
        out.push(self.bits);
        out.extend_from_slice(&self.id.to_be_bytes());
        for word in &self.data {
            out.extend_from_slice(&word.to_be_bytes());
        }
        out
    }

    /// Parse the byte layout of the transport form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ShamirError> {
        if bytes.len() < HEADER_LEN {
            return Err(ShamirError::InvalidShare(format!(
                "{} byte(s), need at least {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        let body = &bytes[HEADER_LEN..];
        if body.len() % 2 != 0 {
            return Err(ShamirError::InvalidShare(
                "share data is not a whole number of words".into(),
            ));
        }

        let share = Share {
            bits: bytes[0],
            id: u16::from_be_bytes([bytes[1], bytes[2]]),
            data: body
                .chunks_exact(2)
                .map(|w| u16::from_be_bytes([w[0], w[1]]))
                .collect(),
        };
        share.check()?;
        Ok(share)
    }

    /// Even-length hex (no prefix) of [`Share::to_bytes`].
    pub fn to_transport(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse the transport form. A `0x` prefix is accepted.
    pub fn from_transport(s: &str) -> Result<Self, ShamirError> {
        let bytes = wire::from_hex(s).map_err(|e| ShamirError::InvalidShare(e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    fn check(&self) -> Result<(), ShamirError> {
        if !(MIN_BITS..=MAX_BITS).contains(&self.bits) {
            return Err(ShamirError::InvalidShare(format!(
                "field size {} out of range",
                self.bits
            )));
        }
        if self.bits != BITS {
            return Err(ShamirError::InvalidShare(format!(
                "unsupported field size {} (only {} bits)",
                self.bits, BITS
            )));
        }
        if self.id == 0 {
            return Err(ShamirError::InvalidShare("share id 0".into()));
        }
        Ok(())
    }
}

impl fmt::Display for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = bits_char(self.bits).ok_or(fmt::Error)?;
        write!(f, "{}{:04x}", marker, self.id)?;
        for word in &self.data {
            write!(f, "{:04x}", word)?;
        }
        Ok(())
    }
}

impl FromStr for Share {
    type Err = ShamirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let marker = chars
            .next()
            .ok_or_else(|| ShamirError::InvalidShare("empty share string".into()))?;
        let bits = marker
            .to_digit(36)
            .ok_or_else(|| ShamirError::InvalidShare(format!("bad field marker '{}'", marker)))?;

        let rest = chars.as_str();
        if rest.len() < 4 || rest.len() % 4 != 0 {
            return Err(ShamirError::InvalidShare(format!(
                "expected groups of 4 hex digits after the marker, got {} digit(s)",
                rest.len()
            )));
        }

        let mut bytes = Vec::with_capacity(1 + rest.len() / 2);
        bytes.push(bits as u8);
        bytes.extend(hex::decode(rest).map_err(|e| ShamirError::InvalidShare(e.to_string()))?);
        Share::from_bytes(&bytes)
    }
}

/// Parse a share from either the string or the transport form.
pub fn parse_share(s: &str) -> Result<Share, ShamirError> {
    let s = s.trim();
    let bare = wire::strip_prefix(s);
    if bare.len() % 2 == 0 && bare.starts_with('0') {
        Share::from_transport(bare)
    } else {
        bare.parse()
    }
}
