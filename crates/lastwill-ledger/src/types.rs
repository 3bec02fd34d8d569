//! Typed ledger records
//!
//! Everything read from or written to the ledger is converted into these
//! types at the [`Ledger`](crate::Ledger) boundary.

use std::fmt;
use std::str::FromStr;

use lastwill_core::hash::keccak256;
use lastwill_core::wire::{self, serde_hex, WireError};
use lastwill_inherit::LegacyEnvelope;
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the Unix epoch, as the ledger reports it.
pub type Timestamp = u64;

/// A 20-byte ledger account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Account address of a public key: the last 20 bytes of the Keccak-256
    /// of the uncompressed point without its `04` tag.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = keccak256(&key.serialize_uncompressed()[1..]);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }

    /// Derive a fresh contract address from its creator and a nonce.
    pub fn derive(creator: &Address, nonce: u64) -> Self {
        let mut preimage = Vec::with_capacity(28);
        preimage.extend_from_slice(&creator.0);
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let digest = keccak256(&preimage);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest[12..]);
        Address(out)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&wire::to_hex(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        wire::from_hex_array(s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Contract phase as recorded by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    CallForKeepers,
    Active,
    CallForKeys,
    Cancelled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::CallForKeepers => "CallForKeepers",
            Phase::Active => "Active",
            Phase::CallForKeys => "CallForKeys",
            Phase::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Contract-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractState {
    pub phase: Phase,
    pub owner: Address,
    /// Seconds the owner may go without checking in
    pub check_in_interval: u64,
    pub last_owner_check_in_at: Timestamp,
    pub num_keepers: usize,
    pub num_proposals: usize,
    /// Successor contract announced by the owner after cancelling
    #[serde(default)]
    pub continuation: Option<Address>,
}

impl ContractState {
    /// When the owner's check-in window closes.
    pub fn owner_deadline(&self) -> Timestamp {
        self.last_owner_check_in_at
            .saturating_add(self.check_in_interval)
    }
}

/// One accepted keeper of a contract. Owned by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperRecord {
    pub address: Address,
    /// Position in the contract's keeper list, which is also the index of
    /// this keeper's key part in the legacy envelope
    pub index: usize,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    /// Fee per check-in
    pub fee: u64,
    /// Fees earned and not yet withdrawn
    pub balance: u64,
    pub last_check_in_at: Timestamp,
    /// Disclosed key part, once supplied
    #[serde(default, with = "serde_hex_option")]
    pub key_part: Option<Vec<u8>>,
}

impl KeeperRecord {
    pub fn key_part_supplied(&self) -> bool {
        self.key_part.is_some()
    }
}

/// A keeper's offer to guard a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub keeper: Address,
    #[serde(with = "serde_hex")]
    pub public_key: Vec<u8>,
    pub fee: u64,
}

/// State-changing calls. Submitted with [`Ledger::submit`](crate::Ledger::submit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transaction {
    /// Offer to become a keeper
    Propose {
        #[serde(with = "serde_hex")]
        public_key: Vec<u8>,
        fee: u64,
    },
    OwnerCheckIn,
    KeeperCheckIn,
    /// Disclose this keeper's padded key part
    SupplyKey {
        #[serde(with = "serde_hex")]
        key_part: Vec<u8>,
    },
    Cancel,
    /// Owner selects proposals (in keeper order) and commits the legacy
    AcceptKeepers {
        proposal_indices: Vec<usize>,
        envelope: Box<LegacyEnvelope>,
    },
    Activate,
    AnnounceContinuation { address: Address },
}

impl Transaction {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Transaction::Propose { .. } => "propose",
            Transaction::OwnerCheckIn => "owner_check_in",
            Transaction::KeeperCheckIn => "keeper_check_in",
            Transaction::SupplyKey { .. } => "supply_key",
            Transaction::Cancel => "cancel",
            Transaction::AcceptKeepers { .. } => "accept_keepers",
            Transaction::Activate => "activate",
            Transaction::AnnounceContinuation { .. } => "announce_continuation",
        }
    }
}

mod serde_hex_option {
    use lastwill_core::wire;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&wire::to_hex(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|s| wire::from_hex(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
