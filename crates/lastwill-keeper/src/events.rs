//! Observations consumed by the keeper event loop

use lastwill_ledger::{Address, LedgerError};

use crate::decision::Snapshot;

/// A state-changing call the keeper made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Propose,
    CheckIn,
    SupplyKey,
    FinalCheckIn,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Propose => "proposal",
            Action::CheckIn => "check-in",
            Action::SupplyKey => "key part",
            Action::FinalCheckIn => "final check-in",
        }
    }
}

/// Everything the event loop reacts to. Discovery, pollers and submission
/// waiters all send these over the same channel.
#[derive(Debug)]
pub enum Observation {
    /// A registry entry, from backfill or the live subscription
    Discovered { index: u64, address: Address },

    /// The startup scan has finished
    BackfillComplete { scanned: u64 },

    /// One poll of a watched contract
    Observed {
        address: Address,
        snapshot: Box<Result<Snapshot, LedgerError>>,
    },

    /// A queued submission came back
    Submitted {
        address: Address,
        action: Action,
        result: Result<(), LedgerError>,
    },
}

impl Observation {
    /// The contract this observation is about, if any
    pub fn address(&self) -> Option<&Address> {
        match self {
            Observation::Discovered { address, .. } => Some(address),
            Observation::Observed { address, .. } => Some(address),
            Observation::Submitted { address, .. } => Some(address),
            Observation::BackfillComplete { .. } => None,
        }
    }

    /// Check if this carries a ledger error
    pub fn is_error(&self) -> bool {
        match self {
            Observation::Observed { snapshot, .. } => snapshot.is_err(),
            Observation::Submitted { result, .. } => result.is_err(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_address() {
        let address = Address([4; 20]);
        let event = Observation::Discovered { index: 7, address };
        assert_eq!(event.address(), Some(&address));
        assert!(!event.is_error());

        let done = Observation::BackfillComplete { scanned: 0 };
        assert!(done.address().is_none());
    }

    #[test]
    fn test_failed_submission_is_error() {
        let event = Observation::Submitted {
            address: Address([4; 20]),
            action: Action::CheckIn,
            result: Err(LedgerError::TransactionFailed("reverted".into())),
        };
        assert!(event.is_error());

        let missing = Observation::Observed {
            address: Address([4; 20]),
            snapshot: Box::new(Err(LedgerError::ContractNotFound(Address([4; 20])))),
        };
        assert!(missing.is_error());
    }
}
