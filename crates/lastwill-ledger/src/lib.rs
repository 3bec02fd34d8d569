//! LastWill Ledger Boundary
//!
//! The ledger is the authority for contract phase and keeper bookkeeping.
//! This crate is the only place that talks to it:
//!
//! - [`Ledger`]: async reads, transaction submission, registry subscription
//! - [`MemoryLedger`]: in-process ledger with a settable clock, for tests and
//!   local simulation
//! - [`RpcLedger`]: JSON-RPC 2.0 client for a ledger gateway
//!
//! # Example
//!
//! ```ignore
//! use lastwill_ledger::{Ledger, RpcLedger};
//!
//! let ledger = RpcLedger::new("http://127.0.0.1:8645");
//! let count = ledger.contract_count().await?;
//! for index in 0..count {
//!     let contract = ledger.contract_at(index).await?;
//!     println!("{} {}", contract, ledger.contract_state(&contract).await?.phase);
//! }
//! ```

pub mod memory;
pub mod rpc;
pub mod types;

pub use memory::MemoryLedger;
pub use rpc::RpcLedger;
pub use types::{Address, ContractState, KeeperRecord, Phase, Proposal, Timestamp, Transaction};

use async_trait::async_trait;
use lastwill_inherit::LegacyEnvelope;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors from ledger operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No contract at {0}")]
    ContractNotFound(Address),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// New registry entries: (registry index, contract address).
pub type ContractFeed = mpsc::Receiver<(u64, Address)>;

/// Everything the keeper needs from the ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Current ledger time.
    async fn now(&self) -> Result<Timestamp, LedgerError>;

    /// Number of contracts in the registry.
    async fn contract_count(&self) -> Result<u64, LedgerError>;

    async fn contract_at(&self, index: u64) -> Result<Address, LedgerError>;

    async fn contract_by_owner(&self, owner: &Address) -> Result<Option<Address>, LedgerError>;

    async fn contract_state(&self, contract: &Address) -> Result<ContractState, LedgerError>;

    /// The keeper record for `keeper`, if it was accepted on `contract`.
    async fn keeper(
        &self,
        contract: &Address,
        keeper: &Address,
    ) -> Result<Option<KeeperRecord>, LedgerError>;

    async fn keeper_at(&self, contract: &Address, index: usize)
        -> Result<KeeperRecord, LedgerError>;

    async fn proposal_at(&self, contract: &Address, index: usize)
        -> Result<Proposal, LedgerError>;

    /// The committed legacy, once the owner has accepted keepers.
    async fn legacy(&self, contract: &Address) -> Result<Option<LegacyEnvelope>, LedgerError>;

    async fn key_part_chunk_count(&self, contract: &Address) -> Result<usize, LedgerError>;

    async fn key_part_chunk(&self, contract: &Address, index: usize)
        -> Result<Vec<u8>, LedgerError>;

    /// Submit a state-changing call on behalf of `from`.
    async fn submit(
        &self,
        from: &Address,
        contract: &Address,
        tx: Transaction,
    ) -> Result<(), LedgerError>;

    /// Notifications for contracts added to the registry from now on.
    async fn subscribe_new_contracts(&self) -> Result<ContractFeed, LedgerError>;
}
