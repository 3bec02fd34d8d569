//! LastWill Keeper
//!
//! Watches lastwill contracts on the ledger and plays the keeper's part in
//! each of them: propose, keep checking in while the owner is around, disclose
//! the key part once keys are called for, and collect the balance when a
//! contract is cancelled.
//!
//! # Features
//!
//! - Startup backfill over recent registry entries plus a live subscription
//! - One poll task per watched contract
//! - Pure decision step ([`decide`]) over a ledger snapshot
//! - Every submission goes through one FIFO queue per identity
//! - Persistent registry cursor across restarts
//!
//! # Example
//!
//! ```ignore
//! use lastwill_keeper::{load_identity, Keeper, KeeperConfig, KeeperContext};
//! use lastwill_ledger::RpcLedger;
//! use std::sync::Arc;
//!
//! let identity = load_identity(&data_dir.join("keeper_key.json"), None)?;
//! let ledger = Arc::new(RpcLedger::new("http://127.0.0.1:8645"));
//! let ctx = KeeperContext::new(ledger, identity, KeeperConfig::default());
//!
//! Keeper::new(ctx)?.run().await?;
//! ```

pub mod decision;
pub mod discovery;
pub mod events;
pub mod queue;
pub mod state;

pub use decision::{check_in_due, decide, Decision, DropReason, Guards, Snapshot};
pub use events::{Action, Observation};
pub use queue::TxQueue;
pub use state::{KeeperState, StateError};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lastwill_core::keystore::{self, KeystoreError};
use lastwill_core::KeyPair;
use lastwill_inherit::{decrypt_key_part, verify_key_part, RecoveryError};
use lastwill_ledger::{Address, Ledger, LedgerError, Phase, Transaction};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

/// Errors from the keeper
#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Keystore error: {0}")]
    Keystore(#[from] KeystoreError),

    #[error("Key part error: {0}")]
    KeyPart(#[from] RecoveryError),

    #[error("No legacy committed")]
    NoLegacy,

    #[error("Key part {index} does not match its commitment")]
    KeyPartMismatch { index: usize },

    #[error("Transaction queue closed")]
    QueueClosed,
}

/// Configuration for the keeper
#[derive(Debug, Clone)]
pub struct KeeperConfig {
    /// Fee asked per check-in
    pub fee: u64,
    /// Contracts with a longer owner check-in interval are ignored
    pub max_check_in_interval_secs: u64,
    /// Delay between polls of one contract
    pub poll_interval: Duration,
    /// Registry entries re-scanned behind the cursor at startup
    pub backfill_depth: u64,
    /// Concurrent registry lookups during backfill
    pub backfill_concurrency: usize,
    /// Cursor file; `None` keeps the cursor in memory only
    pub state_path: Option<PathBuf>,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            fee: 1_000,
            max_check_in_interval_secs: 365 * 86_400,
            poll_interval: Duration::from_secs(60),
            backfill_depth: 1_000,
            backfill_concurrency: 8,
            state_path: None,
        }
    }
}

/// Everything shared by the keeper's tasks.
pub struct KeeperContext {
    pub ledger: Arc<dyn Ledger>,
    pub identity: KeyPair,
    /// Ledger account of `identity`
    pub address: Address,
    pub config: KeeperConfig,
    pub queue: TxQueue,
}

impl KeeperContext {
    /// Build the context and start the identity's transaction queue. Must be
    /// called inside a tokio runtime.
    pub fn new(ledger: Arc<dyn Ledger>, identity: KeyPair, config: KeeperConfig) -> Arc<Self> {
        let address = Address::from_public_key(identity.public_key());
        let queue = TxQueue::spawn(ledger.clone(), address);
        Arc::new(Self {
            ledger,
            identity,
            address,
            config,
            queue,
        })
    }
}

/// Load the keeper keypair from `path`, generating it on first start.
pub fn load_identity(path: &Path, passphrase: Option<&str>) -> Result<KeyPair, KeeperError> {
    let identity = keystore::load_or_generate(path, passphrase)?;
    log::info!(
        "Keeper identity {} (key {})",
        Address::from_public_key(identity.public_key()),
        identity.public_hex()
    );
    Ok(identity)
}

/// Decrypt our key part and check it against the commitment.
fn own_key_part(snapshot: &Snapshot, identity: &KeyPair) -> Result<Zeroizing<Vec<u8>>, KeeperError> {
    let (Some(keeper), Some(legacy)) = (&snapshot.keeper, &snapshot.legacy) else {
        return Err(KeeperError::NoLegacy);
    };
    let part = decrypt_key_part(&snapshot.key_part_chunks, keeper.index, identity.secret_key())?;
    if !verify_key_part(legacy, keeper.index, &part) {
        return Err(KeeperError::KeyPartMismatch {
            index: keeper.index,
        });
    }
    Ok(part)
}

struct WatchEntry {
    /// Registry index the contract was discovered at
    index: u64,
    phase: Option<Phase>,
    pending: Guards,
    poller: JoinHandle<()>,
}

/// The keeper automaton.
///
/// Discovery, pollers and submission waiters only send [`Observation`]s; the
/// event loop owning this struct is the only place the watch set, the guards
/// and the cursor change.
pub struct Keeper {
    ctx: Arc<KeeperContext>,
    state: KeeperState,
    watch: HashMap<Address, WatchEntry>,
    /// Proposals made this process lifetime
    proposed: HashSet<Address>,
    continuous: bool,
    backfill_done: bool,
    pending_polls: usize,
    in_flight: usize,
    submitted: usize,
    events_tx: UnboundedSender<Observation>,
    events_rx: UnboundedReceiver<Observation>,
    tasks: Vec<JoinHandle<()>>,
}

impl Keeper {
    pub fn new(ctx: Arc<KeeperContext>) -> Result<Self, KeeperError> {
        let state = match &ctx.config.state_path {
            Some(path) => KeeperState::load(path)?,
            None => KeeperState::new(),
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Self {
            ctx,
            state,
            watch: HashMap::new(),
            proposed: HashSet::new(),
            continuous: true,
            backfill_done: false,
            pending_polls: 0,
            in_flight: 0,
            submitted: 0,
            events_tx,
            events_rx,
            tasks: Vec::new(),
        })
    }

    pub fn address(&self) -> &Address {
        &self.ctx.address
    }

    pub fn state(&self) -> &KeeperState {
        &self.state
    }

    /// Contracts currently watched
    pub fn watched(&self) -> Vec<Address> {
        self.watch.keys().copied().collect()
    }

    /// Run until the task is dropped or aborted.
    pub async fn run(mut self) -> Result<(), KeeperError> {
        self.continuous = true;
        self.start().await?;
        log::info!("Keeper {} running", self.ctx.address);

        while let Some(observation) = self.events_rx.recv().await {
            self.handle(observation);
        }
        Ok(())
    }

    /// Backfill, look at every discovered contract once, wait for the
    /// resulting submissions, and stop. Returns the number of submissions.
    pub async fn run_once(mut self) -> Result<usize, KeeperError> {
        self.continuous = false;
        self.start().await?;

        while !(self.backfill_done && self.pending_polls == 0 && self.in_flight == 0) {
            match self.events_rx.recv().await {
                Some(observation) => self.handle(observation),
                None => break,
            }
        }
        log::info!(
            "Single pass done: {} contract(s) watched, {} submission(s)",
            self.watch.len(),
            self.submitted
        );
        Ok(self.submitted)
    }

    /// Subscribe first so nothing registered during backfill is missed.
    async fn start(&mut self) -> Result<(), KeeperError> {
        let ledger = &self.ctx.ledger;
        let feed = if self.continuous {
            Some(ledger.subscribe_new_contracts().await?)
        } else {
            None
        };

        let count = ledger.contract_count().await?;
        let start = self
            .state
            .backfill_start(count, self.ctx.config.backfill_depth);
        let pruned = self.state.prune_retired(start);
        if pruned > 0 {
            log::debug!("Forgot {} retired contract(s) behind the backfill window", pruned);
            self.save_state();
        }
        self.tasks.push(tokio::spawn(discovery::backfill(
            self.ctx.clone(),
            start,
            count,
            self.events_tx.clone(),
        )));

        if let Some(feed) = feed {
            self.tasks.push(discovery::forward_subscription(
                feed,
                self.events_tx.clone(),
            ));
        }
        Ok(())
    }

    fn handle(&mut self, observation: Observation) {
        match observation {
            Observation::Discovered { index, address } => self.on_discovered(index, address),
            Observation::BackfillComplete { scanned } => {
                log::info!("Backfill complete, {} registry entries scanned", scanned);
                self.backfill_done = true;
            }
            Observation::Observed { address, snapshot } => {
                if !self.continuous {
                    self.pending_polls = self.pending_polls.saturating_sub(1);
                }
                self.on_snapshot(address, *snapshot);
            }
            Observation::Submitted {
                address,
                action,
                result,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.on_submitted(address, action, result);
            }
        }
    }

    fn on_discovered(&mut self, index: u64, address: Address) {
        if self.state.observe_index(index) {
            self.save_state();
        }
        if self.state.is_retired(&address) || self.watch.contains_key(&address) {
            return;
        }

        log::info!("[{}] Watching (registry #{})", address, index);
        let poller = if self.continuous {
            discovery::spawn_poller(self.ctx.clone(), address, self.events_tx.clone())
        } else {
            self.pending_polls += 1;
            discovery::spawn_single_poll(self.ctx.clone(), address, self.events_tx.clone())
        };
        self.watch.insert(
            address,
            WatchEntry {
                index,
                phase: None,
                pending: Guards::default(),
                poller,
            },
        );
    }

    fn on_snapshot(&mut self, address: Address, result: Result<Snapshot, LedgerError>) {
        if !self.watch.contains_key(&address) {
            return;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(LedgerError::ContractNotFound(_)) => {
                self.retire(address, DropReason::ContractNotFound);
                return;
            }
            Err(e) => {
                log::warn!("[{}] Poll failed: {}", address, e);
                return;
            }
        };

        let guards = match self.watch.get_mut(&address) {
            Some(entry) => {
                if entry.phase != Some(snapshot.state.phase) {
                    log::info!("[{}] Phase {}", address, snapshot.state.phase);
                    entry.phase = Some(snapshot.state.phase);
                }
                Guards {
                    proposed: self.proposed.contains(&address),
                    ..entry.pending
                }
            }
            None => return,
        };

        match decide(&snapshot, &guards, &self.ctx.config) {
            Decision::Wait => {}
            Decision::Drop(reason) => self.retire(address, reason),
            Decision::Propose => {
                self.proposed.insert(address);
                log::info!("[{}] Proposing (fee {})", address, self.ctx.config.fee);
                let tx = Transaction::Propose {
                    public_key: self.ctx.identity.public_key().serialize().to_vec(),
                    fee: self.ctx.config.fee,
                };
                self.submit(address, Action::Propose, tx);
            }
            Decision::CheckIn => {
                self.set_pending(&address, Action::CheckIn, true);
                log::info!("[{}] Checking in", address);
                self.submit(address, Action::CheckIn, Transaction::KeeperCheckIn);
            }
            Decision::SupplyKey => match own_key_part(&snapshot, &self.ctx.identity) {
                Ok(part) => {
                    self.set_pending(&address, Action::SupplyKey, true);
                    log::info!("[{}] Supplying key part", address);
                    let tx = Transaction::SupplyKey {
                        key_part: part.to_vec(),
                    };
                    self.submit(address, Action::SupplyKey, tx);
                }
                Err(e) => {
                    log::error!("[{}] Cannot use own key part: {}", address, e);
                    self.retire(address, DropReason::KeyPartInvalid);
                }
            },
            Decision::FinalCheckIn => {
                self.set_pending(&address, Action::FinalCheckIn, true);
                log::info!("[{}] Contract cancelled, final check-in", address);
                self.submit(address, Action::FinalCheckIn, Transaction::KeeperCheckIn);
            }
        }
    }

    fn on_submitted(&mut self, address: Address, action: Action, result: Result<(), LedgerError>) {
        match result {
            Ok(()) => {
                log::info!("[{}] {} accepted", address, action.as_str());
                self.submitted += 1;
                match action {
                    Action::SupplyKey | Action::FinalCheckIn => {
                        self.retire(address, DropReason::Completed)
                    }
                    Action::CheckIn => self.set_pending(&address, action, false),
                    Action::Propose => {}
                }
            }
            Err(LedgerError::ContractNotFound(_)) => {
                self.retire(address, DropReason::ContractNotFound);
            }
            Err(e) => {
                log::warn!("[{}] {} failed: {}", address, action.as_str(), e);
                match action {
                    // The ledger-side check still prevents a duplicate
                    Action::Propose => {
                        self.proposed.remove(&address);
                    }
                    _ => self.set_pending(&address, action, false),
                }
            }
        }
    }

    fn set_pending(&mut self, address: &Address, action: Action, value: bool) {
        let Some(entry) = self.watch.get_mut(address) else {
            return;
        };
        match action {
            Action::Propose => {}
            Action::CheckIn => entry.pending.check_in_pending = value,
            Action::SupplyKey => entry.pending.supply_pending = value,
            Action::FinalCheckIn => entry.pending.final_check_in_pending = value,
        }
    }

    /// Queue `tx` and report the outcome back to the event loop.
    fn submit(&mut self, address: Address, action: Action, tx: Transaction) {
        let receipt = match self.ctx.queue.enqueue(address, tx) {
            Ok(receipt) => receipt,
            Err(e) => {
                log::error!("[{}] Cannot queue {}: {}", address, action.as_str(), e);
                return;
            }
        };

        self.in_flight += 1;
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = receipt
                .await
                .unwrap_or_else(|_| Err(LedgerError::Transport("transaction queue closed".into())));
            let _ = events.send(Observation::Submitted {
                address,
                action,
                result,
            });
        });
    }

    /// Stop watching a contract for good.
    fn retire(&mut self, address: Address, reason: DropReason) {
        let Some(entry) = self.watch.remove(&address) else {
            return;
        };
        entry.poller.abort();
        log::info!("[{}] No longer watching: {}", address, reason);
        if self.state.retire(address, entry.index) {
            self.save_state();
        }
    }

    fn save_state(&self) {
        if let Some(path) = &self.ctx.config.state_path {
            if let Err(e) = self.state.save(path) {
                log::warn!("Failed to save keeper state: {}", e);
            }
        }
    }
}

impl Drop for Keeper {
    fn drop(&mut self) {
        for entry in self.watch.values() {
            entry.poller.abort();
        }
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastwill_inherit::encrypt_legacy;
    use lastwill_ledger::{KeeperRecord, MemoryLedger};

    #[test]
    fn test_default_config() {
        let config = KeeperConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert!(config.backfill_concurrency > 0);
        assert!(config.state_path.is_none());
    }

    #[test]
    fn test_load_identity_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper_key.json");
        let first = load_identity(&path, None).unwrap();
        let second = load_identity(&path, None).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_own_key_part_checks_commitment() {
        let keepers = [KeyPair::generate(), KeyPair::generate()];
        let publics: Vec<_> = keepers.iter().map(|k| *k.public_key()).collect();
        let recipient = KeyPair::generate();
        let legacy = encrypt_legacy(b"payload", recipient.public_key(), &publics, 2).unwrap();

        let record = |index: usize| KeeperRecord {
            address: Address::from_public_key(keepers[index].public_key()),
            index,
            public_key: keepers[index].public_key().serialize().to_vec(),
            fee: 1,
            balance: 0,
            last_check_in_at: 0,
            key_part: None,
        };
        let snapshot = Snapshot {
            now: 0,
            state: lastwill_ledger::ContractState {
                phase: Phase::CallForKeys,
                owner: Address([0xAA; 20]),
                check_in_interval: 60,
                last_owner_check_in_at: 0,
                num_keepers: 2,
                num_proposals: 2,
                continuation: None,
            },
            keeper: Some(record(1)),
            proposed: false,
            key_part_chunks: legacy.key_part_chunks.clone(),
            legacy: Some(legacy),
        };

        let part = own_key_part(&snapshot, &keepers[1]).unwrap();
        let legacy = snapshot.legacy.as_ref().unwrap();
        assert!(verify_key_part(legacy, 1, &part));

        // Wrong identity for the slot
        assert!(own_key_part(&snapshot, &keepers[0]).is_err());

        let no_legacy = Snapshot {
            legacy: None,
            ..snapshot
        };
        assert!(matches!(
            own_key_part(&no_legacy, &keepers[1]),
            Err(KeeperError::NoLegacy)
        ));
    }

    #[tokio::test]
    async fn test_run_once_proposes_on_open_contracts() {
        let ledger = Arc::new(MemoryLedger::new(1_000));
        let open = ledger.create_contract(Address([0xAA; 20]), 3_600).await;
        let too_long = ledger.create_contract(Address([0xBB; 20]), u64::MAX).await;

        let ctx = KeeperContext::new(ledger.clone(), KeyPair::generate(), KeeperConfig::default());
        let me = ctx.address;
        let submitted = Keeper::new(ctx).unwrap().run_once().await.unwrap();
        assert_eq!(submitted, 1);

        let proposal = ledger.proposal_at(&open, 0).await.unwrap();
        assert_eq!(proposal.keeper, me);
        assert_eq!(
            ledger.contract_state(&too_long).await.unwrap().num_proposals,
            0
        );
    }

    async fn proposals_from(ledger: &MemoryLedger, from: &Address) -> usize {
        ledger
            .submissions()
            .await
            .iter()
            .filter(|s| s.from == *from && s.kind == "propose")
            .count()
    }

    #[tokio::test]
    async fn test_duplicate_discovery_watched_once() {
        let ledger = Arc::new(MemoryLedger::new(1_000));
        let open = ledger.create_contract(Address([0xAA; 20]), 3_600).await;

        let ctx = KeeperContext::new(ledger.clone(), KeyPair::generate(), KeeperConfig::default());
        let me = ctx.address;
        let keeper = Keeper::new(ctx).unwrap();

        // Reported by the subscription twice, then again by backfill
        for _ in 0..2 {
            keeper
                .events_tx
                .send(Observation::Discovered {
                    index: 0,
                    address: open,
                })
                .unwrap();
        }
        let submitted = keeper.run_once().await.unwrap();

        assert_eq!(submitted, 1);
        assert_eq!(proposals_from(&ledger, &me).await, 1);
        assert_eq!(ledger.contract_state(&open).await.unwrap().num_proposals, 1);
    }

    #[tokio::test]
    async fn test_duplicate_discovery_while_running() {
        let ledger = Arc::new(MemoryLedger::new(1_000));
        let open = ledger.create_contract(Address([0xAA; 20]), 3_600).await;

        let config = KeeperConfig {
            poll_interval: Duration::from_millis(10),
            ..KeeperConfig::default()
        };
        let ctx = KeeperContext::new(ledger.clone(), KeyPair::generate(), config);
        let me = ctx.address;
        let keeper = Keeper::new(ctx).unwrap();
        let events = keeper.events_tx.clone();
        for _ in 0..3 {
            events
                .send(Observation::Discovered {
                    index: 0,
                    address: open,
                })
                .unwrap();
        }
        let handle = tokio::spawn(keeper.run());

        tokio::time::sleep(Duration::from_millis(150)).await;
        events
            .send(Observation::Discovered {
                index: 0,
                address: open,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(proposals_from(&ledger, &me).await, 1);
        assert_eq!(ledger.contract_state(&open).await.unwrap().num_proposals, 1);
        handle.abort();
    }
}
