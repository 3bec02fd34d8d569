//! Hex wire encoding
//!
//! Every binary value crossing the ledger boundary is a lower-case hex string.
//! Parsers accept both `0x`-prefixed and bare forms; producers always emit the
//! prefixed form.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("Invalid hex: {0}")]
    InvalidHex(String),
    #[error("Expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Strip an optional `0x` / `0X` prefix.
pub fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Encode bytes as canonical `0x`-prefixed lower-case hex.
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode hex with or without the `0x` prefix.
pub fn from_hex(s: &str) -> Result<Vec<u8>, WireError> {
    let body = strip_prefix(s.trim());
    hex::decode(body).map_err(|e| WireError::InvalidHex(e.to_string()))
}

/// Decode hex into a fixed-size array.
pub fn from_hex_array<const N: usize>(s: &str) -> Result<[u8; N], WireError> {
    let bytes = from_hex(s)?;
    if bytes.len() != N {
        return Err(WireError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Serde adapter for `Vec<u8>` fields carried as prefixed hex.
pub mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for fixed-size arrays (hashes, counters) carried as prefixed hex.
pub mod serde_hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::to_hex(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::from_hex_array(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for lists of byte strings, each carried as prefixed hex.
pub mod serde_hex_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, T>(items: &[T], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: AsRef<[u8]>,
    {
        serializer.collect_seq(items.iter().map(|item| super::to_hex(item.as_ref())))
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: TryFrom<Vec<u8>>,
    {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| {
                let bytes = super::from_hex(s).map_err(D::Error::custom)?;
                let len = bytes.len();
                T::try_from(bytes).map_err(|_| {
                    D::Error::custom(format!("unexpected length {} in hex list", len))
                })
            })
            .collect()
    }
}
