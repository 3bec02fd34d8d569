//! In-process ledger
//!
//! Keeps just enough contract bookkeeping (phases, proposals, keepers,
//! balances, key parts) to drive complete lifecycles without a network. The
//! clock only moves when told to. Submissions are recorded, together with the
//! peak number of submissions in flight at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lastwill_inherit::{verify_key_part, LegacyEnvelope};
use tokio::sync::{mpsc, Mutex};

use crate::types::{
    Address, ContractState, KeeperRecord, Phase, Proposal, Timestamp, Transaction,
};
use crate::{ContractFeed, Ledger, LedgerError};

const FEED_CAPACITY: usize = 64;

/// One submitted transaction, as the ledger saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub from: Address,
    pub contract: Address,
    pub kind: &'static str,
    pub accepted: bool,
}

#[derive(Debug, Clone)]
struct Contract {
    state: ContractState,
    proposals: Vec<Proposal>,
    keepers: Vec<KeeperRecord>,
    legacy: Option<LegacyEnvelope>,
}

#[derive(Default)]
struct Inner {
    now: Timestamp,
    nonce: u64,
    registry: Vec<Address>,
    contracts: HashMap<Address, Contract>,
    subscribers: Vec<mpsc::Sender<(u64, Address)>>,
    submissions: Vec<Submission>,
}

fn rejected<T>(reason: impl Into<String>) -> Result<T, LedgerError> {
    Err(LedgerError::TransactionFailed(reason.into()))
}

impl Inner {
    fn contract(&self, address: &Address) -> Result<&Contract, LedgerError> {
        self.contracts
            .get(address)
            .ok_or(LedgerError::ContractNotFound(*address))
    }

    fn apply(&mut self, from: &Address, address: &Address, tx: Transaction) -> Result<(), LedgerError> {
        let now = self.now;
        let contract = self
            .contracts
            .get_mut(address)
            .ok_or(LedgerError::ContractNotFound(*address))?;
        let is_owner = contract.state.owner == *from;
        let phase = contract.state.phase;

        match tx {
            Transaction::Propose { public_key, fee } => {
                if phase != Phase::CallForKeepers {
                    return rejected(format!("proposals closed ({})", phase));
                }
                if contract.proposals.iter().any(|p| p.keeper == *from) {
                    return rejected("already proposed");
                }
                contract.proposals.push(Proposal {
                    keeper: *from,
                    public_key,
                    fee,
                });
                contract.state.num_proposals = contract.proposals.len();
            }

            Transaction::OwnerCheckIn => {
                if !is_owner {
                    return rejected("only the owner can check in");
                }
                if phase != Phase::Active {
                    return rejected(format!("cannot check in while {}", phase));
                }
                contract.state.last_owner_check_in_at = now;
            }

            Transaction::KeeperCheckIn => {
                let deadline = contract.state.owner_deadline();
                let Some(keeper) = contract.keepers.iter_mut().find(|k| k.address == *from) else {
                    return rejected("not a keeper");
                };
                match phase {
                    Phase::Active => {
                        keeper.last_check_in_at = now;
                        keeper.balance += keeper.fee;
                        if now >= deadline {
                            contract.state.phase = Phase::CallForKeys;
                        }
                    }
                    Phase::Cancelled => {
                        if keeper.balance == 0 {
                            return rejected("nothing to withdraw");
                        }
                        keeper.balance = 0;
                        keeper.last_check_in_at = now;
                    }
                    other => return rejected(format!("cannot check in while {}", other)),
                }
            }

            Transaction::SupplyKey { key_part } => {
                if phase != Phase::CallForKeys {
                    return rejected(format!("keys not called for ({})", phase));
                }
                let Some(legacy) = contract.legacy.as_ref() else {
                    return rejected("no legacy committed");
                };
                let Some(keeper) = contract.keepers.iter_mut().find(|k| k.address == *from) else {
                    return rejected("not a keeper");
                };
                if keeper.key_part_supplied() {
                    return rejected("key part already supplied");
                }
                if !verify_key_part(legacy, keeper.index, &key_part) {
                    return rejected("key part does not match its commitment");
                }
                keeper.key_part = Some(key_part);
            }

            Transaction::Cancel => {
                if !is_owner {
                    return rejected("only the owner can cancel");
                }
                if !matches!(phase, Phase::CallForKeepers | Phase::Active) {
                    return rejected(format!("cannot cancel while {}", phase));
                }
                contract.state.phase = Phase::Cancelled;
            }

            Transaction::AcceptKeepers {
                proposal_indices,
                envelope,
            } => {
                if !is_owner {
                    return rejected("only the owner can accept keepers");
                }
                if phase != Phase::CallForKeepers || !contract.keepers.is_empty() {
                    return rejected("keepers already accepted");
                }
                if proposal_indices.is_empty() || envelope.keeper_count() != proposal_indices.len()
                {
                    return rejected("envelope does not match the selected keepers");
                }
                let mut keepers = Vec::with_capacity(proposal_indices.len());
                for (index, &proposal_index) in proposal_indices.iter().enumerate() {
                    let Some(proposal) = contract.proposals.get(proposal_index) else {
                        return rejected(format!("no proposal {}", proposal_index));
                    };
                    if keepers.iter().any(|k: &KeeperRecord| k.address == proposal.keeper) {
                        return rejected(format!("proposal {} selected twice", proposal_index));
                    }
                    keepers.push(KeeperRecord {
                        address: proposal.keeper,
                        index,
                        public_key: proposal.public_key.clone(),
                        fee: proposal.fee,
                        balance: 0,
                        last_check_in_at: now,
                        key_part: None,
                    });
                }
                contract.state.num_keepers = keepers.len();
                contract.keepers = keepers;
                contract.legacy = Some(*envelope);
            }

            Transaction::Activate => {
                if !is_owner {
                    return rejected("only the owner can activate");
                }
                if phase != Phase::CallForKeepers || contract.keepers.is_empty() {
                    return rejected("nothing to activate");
                }
                contract.state.phase = Phase::Active;
                contract.state.last_owner_check_in_at = now;
            }

            Transaction::AnnounceContinuation { address } => {
                if !is_owner {
                    return rejected("only the owner can announce a continuation");
                }
                if phase != Phase::Cancelled {
                    return rejected("contract is not cancelled");
                }
                contract.state.continuation = Some(address);
            }
        }

        Ok(())
    }
}

/// In-memory [`Ledger`].
pub struct MemoryLedger {
    inner: Mutex<Inner>,
    submit_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(now: Timestamp) -> Self {
        Self {
            inner: Mutex::new(Inner {
                now,
                ..Default::default()
            }),
            submit_delay_ms: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub async fn set_now(&self, now: Timestamp) {
        self.inner.lock().await.now = now;
    }

    pub async fn advance(&self, secs: u64) {
        let mut inner = self.inner.lock().await;
        inner.now = inner.now.saturating_add(secs);
    }

    /// Hold every submission for `delay` before applying it.
    pub fn set_submit_delay(&self, delay: Duration) {
        self.submit_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Register a new contract in the CallForKeepers phase.
    pub async fn create_contract(&self, owner: Address, check_in_interval: u64) -> Address {
        let mut inner = self.inner.lock().await;
        let address = Address::derive(&owner, inner.nonce);
        inner.nonce += 1;

        let state = ContractState {
            phase: Phase::CallForKeepers,
            owner,
            check_in_interval,
            last_owner_check_in_at: inner.now,
            num_keepers: 0,
            num_proposals: 0,
            continuation: None,
        };
        inner.contracts.insert(
            address,
            Contract {
                state,
                proposals: Vec::new(),
                keepers: Vec::new(),
                legacy: None,
            },
        );
        inner.registry.push(address);
        let index = (inner.registry.len() - 1) as u64;

        inner.subscribers.retain(|tx| !tx.is_closed());
        for tx in &inner.subscribers {
            if tx.try_send((index, address)).is_err() {
                log::warn!("[{}] Contract feed full, notification dropped", address);
            }
        }

        log::debug!("[{}] Created contract #{} for {}", address, index, owner);
        address
    }

    /// Make a contract disappear while keeping its registry slot.
    pub async fn remove_contract(&self, address: &Address) {
        self.inner.lock().await.contracts.remove(address);
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().await.submissions.clone()
    }

    /// Most submissions that were ever being processed at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Restart [`Self::max_in_flight`] from the current load.
    pub fn reset_max_in_flight(&self) {
        self.max_in_flight
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn now(&self) -> Result<Timestamp, LedgerError> {
        Ok(self.inner.lock().await.now)
    }

    async fn contract_count(&self) -> Result<u64, LedgerError> {
        Ok(self.inner.lock().await.registry.len() as u64)
    }

    async fn contract_at(&self, index: u64) -> Result<Address, LedgerError> {
        self.inner
            .lock()
            .await
            .registry
            .get(index as usize)
            .copied()
            .ok_or_else(|| LedgerError::RecordNotFound(format!("registry entry {}", index)))
    }

    async fn contract_by_owner(&self, owner: &Address) -> Result<Option<Address>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .registry
            .iter()
            .rev()
            .find(|addr| {
                inner
                    .contracts
                    .get(*addr)
                    .is_some_and(|c| c.state.owner == *owner)
            })
            .copied())
    }

    async fn contract_state(&self, contract: &Address) -> Result<ContractState, LedgerError> {
        Ok(self.inner.lock().await.contract(contract)?.state.clone())
    }

    async fn keeper(
        &self,
        contract: &Address,
        keeper: &Address,
    ) -> Result<Option<KeeperRecord>, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .contract(contract)?
            .keepers
            .iter()
            .find(|k| k.address == *keeper)
            .cloned())
    }

    async fn keeper_at(
        &self,
        contract: &Address,
        index: usize,
    ) -> Result<KeeperRecord, LedgerError> {
        let inner = self.inner.lock().await;
        inner
            .contract(contract)?
            .keepers
            .get(index)
            .cloned()
            .ok_or_else(|| LedgerError::RecordNotFound(format!("keeper {} of {}", index, contract)))
    }

    async fn proposal_at(&self, contract: &Address, index: usize) -> Result<Proposal, LedgerError> {
        let inner = self.inner.lock().await;
        inner
            .contract(contract)?
            .proposals
            .get(index)
            .cloned()
            .ok_or_else(|| {
                LedgerError::RecordNotFound(format!("proposal {} of {}", index, contract))
            })
    }

    async fn legacy(&self, contract: &Address) -> Result<Option<LegacyEnvelope>, LedgerError> {
        Ok(self.inner.lock().await.contract(contract)?.legacy.clone())
    }

    async fn key_part_chunk_count(&self, contract: &Address) -> Result<usize, LedgerError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .contract(contract)?
            .legacy
            .as_ref()
            .map_or(0, |l| l.key_part_chunks.len()))
    }

    async fn key_part_chunk(
        &self,
        contract: &Address,
        index: usize,
    ) -> Result<Vec<u8>, LedgerError> {
        let inner = self.inner.lock().await;
        inner
            .contract(contract)?
            .legacy
            .as_ref()
            .and_then(|l| l.key_part_chunks.get(index))
            .cloned()
            .ok_or_else(|| LedgerError::RecordNotFound(format!("chunk {} of {}", index, contract)))
    }

    async fn submit(
        &self,
        from: &Address,
        contract: &Address,
        tx: Transaction,
    ) -> Result<(), LedgerError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let delay = self.submit_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let kind = tx.kind();
        let result = {
            let mut inner = self.inner.lock().await;
            let result = inner.apply(from, contract, tx);
            inner.submissions.push(Submission {
                from: *from,
                contract: *contract,
                kind,
                accepted: result.is_ok(),
            });
            result
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn subscribe_new_contracts(&self) -> Result<ContractFeed, LedgerError> {
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        self.inner.lock().await.subscribers.push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastwill_core::KeyPair;
    use lastwill_inherit::{decrypt_key_part, encrypt_legacy};

    const OWNER: Address = Address([0xAA; 20]);
    const DAY: u64 = 86_400;

    struct Keeper {
        keys: KeyPair,
        address: Address,
    }

    fn keeper() -> Keeper {
        let keys = KeyPair::generate();
        let address = Address::from_public_key(keys.public_key());
        Keeper { keys, address }
    }

    /// Contract with `keepers` accepted and activated.
    async fn active_contract(ledger: &MemoryLedger, keepers: &[Keeper]) -> (Address, KeyPair) {
        let contract = ledger.create_contract(OWNER, DAY).await;
        for k in keepers {
            ledger
                .submit(
                    &k.address,
                    &contract,
                    Transaction::Propose {
                        public_key: k.keys.public_key().serialize().to_vec(),
                        fee: 5,
                    },
                )
                .await
                .unwrap();
        }

        let recipient = KeyPair::generate();
        let publics: Vec<_> = keepers.iter().map(|k| *k.keys.public_key()).collect();
        let envelope = encrypt_legacy(b"legacy", recipient.public_key(), &publics, 2).unwrap();
        ledger
            .submit(
                &OWNER,
                &contract,
                Transaction::AcceptKeepers {
                    proposal_indices: (0..keepers.len()).collect(),
                    envelope: Box::new(envelope),
                },
            )
            .await
            .unwrap();
        ledger
            .submit(&OWNER, &contract, Transaction::Activate)
            .await
            .unwrap();
        (contract, recipient)
    }

    #[tokio::test]
    async fn test_registry_and_subscription() {
        let ledger = MemoryLedger::new(1_000);
        let mut feed = ledger.subscribe_new_contracts().await.unwrap();

        let first = ledger.create_contract(OWNER, DAY).await;
        let second = ledger.create_contract(OWNER, DAY).await;
        assert_ne!(first, second);

        assert_eq!(ledger.contract_count().await.unwrap(), 2);
        assert_eq!(ledger.contract_at(1).await.unwrap(), second);
        assert_eq!(
            ledger.contract_by_owner(&OWNER).await.unwrap(),
            Some(second)
        );
        assert_eq!(feed.recv().await, Some((0, first)));
        assert_eq!(feed.recv().await, Some((1, second)));

        assert!(matches!(
            ledger.contract_at(2).await,
            Err(LedgerError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_proposal_rejected() {
        let ledger = MemoryLedger::new(1_000);
        let contract = ledger.create_contract(OWNER, DAY).await;
        let k = keeper();
        let propose = Transaction::Propose {
            public_key: k.keys.public_key().serialize().to_vec(),
            fee: 1,
        };

        ledger
            .submit(&k.address, &contract, propose.clone())
            .await
            .unwrap();
        assert!(matches!(
            ledger.submit(&k.address, &contract, propose).await,
            Err(LedgerError::TransactionFailed(_))
        ));
        assert_eq!(
            ledger.contract_state(&contract).await.unwrap().num_proposals,
            1
        );
    }

    #[tokio::test]
    async fn test_keeper_check_in_after_deadline_calls_for_keys() {
        let ledger = MemoryLedger::new(1_000);
        let keepers = [keeper(), keeper(), keeper()];
        let (contract, _) = active_contract(&ledger, &keepers).await;

        // Within the window: fee accrues, phase unchanged
        ledger.advance(DAY / 2).await;
        ledger
            .submit(&keepers[0].address, &contract, Transaction::KeeperCheckIn)
            .await
            .unwrap();
        let record = ledger
            .keeper(&contract, &keepers[0].address)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, 5);
        assert_eq!(
            ledger.contract_state(&contract).await.unwrap().phase,
            Phase::Active
        );

        ledger.advance(DAY).await;
        ledger
            .submit(&keepers[1].address, &contract, Transaction::KeeperCheckIn)
            .await
            .unwrap();
        assert_eq!(
            ledger.contract_state(&contract).await.unwrap().phase,
            Phase::CallForKeys
        );
    }

    #[tokio::test]
    async fn test_supply_key_checks_commitment() {
        let ledger = MemoryLedger::new(1_000);
        let keepers = [keeper(), keeper()];
        let (contract, _) = active_contract(&ledger, &keepers).await;
        ledger.advance(2 * DAY).await;
        ledger
            .submit(&keepers[0].address, &contract, Transaction::KeeperCheckIn)
            .await
            .unwrap();

        let count = ledger.key_part_chunk_count(&contract).await.unwrap();
        let mut chunks = Vec::new();
        for i in 0..count {
            chunks.push(ledger.key_part_chunk(&contract, i).await.unwrap());
        }
        let part = decrypt_key_part(&chunks, 1, keepers[1].keys.secret_key()).unwrap();

        // Keeper 0 cannot submit keeper 1's part
        assert!(matches!(
            ledger
                .submit(
                    &keepers[0].address,
                    &contract,
                    Transaction::SupplyKey {
                        key_part: part.to_vec()
                    }
                )
                .await,
            Err(LedgerError::TransactionFailed(_))
        ));

        let supply = Transaction::SupplyKey {
            key_part: part.to_vec(),
        };
        ledger
            .submit(&keepers[1].address, &contract, supply.clone())
            .await
            .unwrap();
        assert!(ledger
            .keeper_at(&contract, 1)
            .await
            .unwrap()
            .key_part_supplied());
        assert!(ledger
            .submit(&keepers[1].address, &contract, supply)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_cancel_and_final_withdrawal() {
        let ledger = MemoryLedger::new(1_000);
        let keepers = [keeper(), keeper()];
        let (contract, _) = active_contract(&ledger, &keepers).await;

        ledger.advance(100).await;
        ledger
            .submit(&keepers[0].address, &contract, Transaction::KeeperCheckIn)
            .await
            .unwrap();
        assert!(ledger
            .submit(&keepers[0].address, &contract, Transaction::Cancel)
            .await
            .is_err());
        ledger
            .submit(&OWNER, &contract, Transaction::Cancel)
            .await
            .unwrap();

        ledger
            .submit(&keepers[0].address, &contract, Transaction::KeeperCheckIn)
            .await
            .unwrap();
        assert_eq!(
            ledger
                .keeper_at(&contract, 0)
                .await
                .unwrap()
                .balance,
            0
        );
        // Second withdrawal and a keeper with nothing earned both fail
        assert!(ledger
            .submit(&keepers[0].address, &contract, Transaction::KeeperCheckIn)
            .await
            .is_err());
        assert!(ledger
            .submit(&keepers[1].address, &contract, Transaction::KeeperCheckIn)
            .await
            .is_err());

        let successor = Address([0xBB; 20]);
        ledger
            .submit(
                &OWNER,
                &contract,
                Transaction::AnnounceContinuation { address: successor },
            )
            .await
            .unwrap();
        assert_eq!(
            ledger.contract_state(&contract).await.unwrap().continuation,
            Some(successor)
        );
    }

    #[tokio::test]
    async fn test_missing_contract() {
        let ledger = MemoryLedger::new(1_000);
        let contract = ledger.create_contract(OWNER, DAY).await;
        ledger.remove_contract(&contract).await;

        assert_eq!(
            ledger.contract_state(&contract).await,
            Err(LedgerError::ContractNotFound(contract))
        );
        assert_eq!(
            ledger
                .submit(&OWNER, &contract, Transaction::Cancel)
                .await,
            Err(LedgerError::ContractNotFound(contract))
        );
    }

    #[tokio::test]
    async fn test_records_submissions() {
        let ledger = MemoryLedger::new(1_000);
        let contract = ledger.create_contract(OWNER, DAY).await;
        let _ = ledger
            .submit(&OWNER, &contract, Transaction::OwnerCheckIn)
            .await;
        ledger
            .submit(&OWNER, &contract, Transaction::Cancel)
            .await
            .unwrap();

        let log = ledger.submissions().await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind, "owner_check_in");
        assert!(!log[0].accepted);
        assert_eq!(log[1].kind, "cancel");
        assert!(log[1].accepted);
        assert_eq!(ledger.max_in_flight(), 1);
    }
}
