//! What to do about one contract, given what the ledger just told us
//!
//! [`decide`] is a pure function of a [`Snapshot`], the event loop's
//! [`Guards`] for that contract and the [`KeeperConfig`]. Everything that
//! touches the ledger or a key happens elsewhere.

use std::fmt;

use lastwill_inherit::LegacyEnvelope;
use lastwill_ledger::{ContractState, KeeperRecord, Phase, Timestamp};

use crate::KeeperConfig;

/// One poll's view of a contract, from this keeper's point of view.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Ledger time at the poll
    pub now: Timestamp,
    pub state: ContractState,
    /// Our keeper record, if our proposal was accepted
    pub keeper: Option<KeeperRecord>,
    /// The ledger lists a proposal from us
    pub proposed: bool,
    /// Only fetched while a key part is owed
    pub legacy: Option<LegacyEnvelope>,
    pub key_part_chunks: Vec<Vec<u8>>,
}

/// In-memory guards held by the event loop for one contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    /// A proposal was submitted this process lifetime
    pub proposed: bool,
    pub check_in_pending: bool,
    pub supply_pending: bool,
    pub final_check_in_pending: bool,
}

/// Why a contract leaves the watch set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Check-in interval above our configured maximum
    Ineligible { interval: u64 },
    /// Our proposal was not accepted
    NotKeeper,
    KeyPartSupplied,
    /// Cancelled with nothing left to withdraw
    NothingToClaim,
    KeyPartInvalid,
    ContractNotFound,
    Completed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Ineligible { interval } => {
                write!(f, "check-in interval {}s is above our maximum", interval)
            }
            DropReason::NotKeeper => f.write_str("not a keeper"),
            DropReason::KeyPartSupplied => f.write_str("key part already supplied"),
            DropReason::NothingToClaim => f.write_str("nothing to claim"),
            DropReason::KeyPartInvalid => f.write_str("own key part unusable"),
            DropReason::ContractNotFound => f.write_str("contract not found"),
            DropReason::Completed => f.write_str("done"),
        }
    }
}

/// Outcome of [`decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Wait,
    Propose,
    CheckIn,
    SupplyKey,
    FinalCheckIn,
    Drop(DropReason),
}

/// Our check-in is due when our own window has run out, or when the owner's
/// deadline has passed and we have not checked in since. The latter is what
/// moves the ledger to CallForKeys.
pub fn check_in_due(now: Timestamp, state: &ContractState, keeper: &KeeperRecord) -> bool {
    let own_due = keeper
        .last_check_in_at
        .saturating_add(state.check_in_interval);
    let owner_deadline = state.owner_deadline();
    now >= own_due || (now >= owner_deadline && keeper.last_check_in_at < owner_deadline)
}

pub fn decide(snapshot: &Snapshot, guards: &Guards, config: &KeeperConfig) -> Decision {
    let state = &snapshot.state;
    if state.check_in_interval > config.max_check_in_interval_secs {
        return Decision::Drop(DropReason::Ineligible {
            interval: state.check_in_interval,
        });
    }

    match state.phase {
        Phase::CallForKeepers => {
            if snapshot.keeper.is_some() || snapshot.proposed || guards.proposed {
                Decision::Wait
            } else {
                Decision::Propose
            }
        }

        Phase::Active => {
            let Some(keeper) = &snapshot.keeper else {
                return Decision::Drop(DropReason::NotKeeper);
            };
            if !guards.check_in_pending && check_in_due(snapshot.now, state, keeper) {
                Decision::CheckIn
            } else {
                Decision::Wait
            }
        }

        Phase::CallForKeys => {
            let Some(keeper) = &snapshot.keeper else {
                return Decision::Drop(DropReason::NotKeeper);
            };
            if keeper.key_part_supplied() {
                Decision::Drop(DropReason::KeyPartSupplied)
            } else if guards.supply_pending {
                Decision::Wait
            } else {
                Decision::SupplyKey
            }
        }

        Phase::Cancelled => {
            let Some(keeper) = &snapshot.keeper else {
                return Decision::Drop(DropReason::NotKeeper);
            };
            if keeper.balance == 0 {
                Decision::Drop(DropReason::NothingToClaim)
            } else if guards.final_check_in_pending {
                Decision::Wait
            } else {
                Decision::FinalCheckIn
            }
        }
    }
}
