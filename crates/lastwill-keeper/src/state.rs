//! Persistent state for the keeper
//!
//! The registry cursor and the retired contracts survive a restart. Everything
//! else is re-read from the ledger on startup. A retired entry is only kept
//! while its registry index can still come back through backfill, so the file
//! stays bounded by the backfill window.

use lastwill_ledger::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Errors from state operations
#[derive(Error, Debug)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Keeper state kept between runs
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct KeeperState {
    /// Highest registry index seen so far
    pub last_observed_index: Option<u64>,
    /// Contracts this keeper is done with, by registry index
    #[serde(default)]
    pub retired: BTreeMap<Address, u64>,
}

impl KeeperState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from file, or start empty if there is none
    pub fn load(path: &Path) -> Result<Self, StateError> {
        if path.exists() {
            let contents = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Advance the cursor. Returns false when `index` is not new.
    pub fn observe_index(&mut self, index: u64) -> bool {
        if self.last_observed_index.is_some_and(|last| index <= last) {
            return false;
        }
        self.last_observed_index = Some(index);
        true
    }

    /// First registry index to scan, `depth` entries behind the cursor or
    /// behind the registry tail when nothing was observed yet.
    pub fn backfill_start(&self, count: u64, depth: u64) -> u64 {
        match self.last_observed_index {
            Some(last) => (last + 1).saturating_sub(depth).min(count),
            None => count.saturating_sub(depth),
        }
    }

    pub fn retire(&mut self, contract: Address, index: u64) -> bool {
        self.retired.insert(contract, index).is_none()
    }

    pub fn is_retired(&self, contract: &Address) -> bool {
        self.retired.contains_key(contract)
    }

    /// Forget retired contracts registered before `start`; backfill from
    /// `start` can no longer rediscover them. Returns how many were dropped.
    pub fn prune_retired(&mut self, start: u64) -> usize {
        let before = self.retired.len();
        self.retired.retain(|_, index| *index >= start);
        before - self.retired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_cursor_only_moves_forward() {
        let mut state = KeeperState::new();
        assert!(state.observe_index(4));
        assert!(!state.observe_index(4));
        assert!(!state.observe_index(2));
        assert!(state.observe_index(0x10));
        assert_eq!(state.last_observed_index, Some(0x10));
    }

    #[test]
    fn test_backfill_start() {
        let mut state = KeeperState::new();
        // No cursor: the last `depth` registry entries
        assert_eq!(state.backfill_start(10, 3), 7);
        assert_eq!(state.backfill_start(2, 3), 0);

        state.observe_index(5);
        assert_eq!(state.backfill_start(10, 3), 3);
        assert_eq!(state.backfill_start(10, 0), 6);
        assert_eq!(state.backfill_start(10, 100), 0);
        // Registry shrank below the cursor (different ledger)
        assert_eq!(state.backfill_start(2, 0), 2);
    }

    #[test]
    fn test_keeper_state_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("keeper_state.json");

        let mut state = KeeperState::new();
        state.observe_index(41);
        state.retire(Address([9; 20]), 40);
        state.save(&path).unwrap();

        let loaded = KeeperState::load(&path).unwrap();
        assert_eq!(loaded, state);
        assert!(loaded.is_retired(&Address([9; 20])));
    }

    #[test]
    fn test_prune_retired_behind_window() {
        let mut state = KeeperState::new();
        assert!(state.retire(Address([1; 20]), 2));
        assert!(!state.retire(Address([1; 20]), 2));
        state.retire(Address([2; 20]), 7);
        state.retire(Address([3; 20]), 9);
        state.observe_index(9);

        let start = state.backfill_start(10, 3);
        assert_eq!(start, 7);
        assert_eq!(state.prune_retired(start), 1);
        assert!(!state.is_retired(&Address([1; 20])));
        assert!(state.is_retired(&Address([2; 20])));
        assert!(state.is_retired(&Address([3; 20])));
        assert_eq!(state.prune_retired(start), 0);
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempdir().unwrap();
        let loaded = KeeperState::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded, KeeperState::default());
    }

    #[test]
    fn test_older_state_without_retired() {
        let loaded: KeeperState = serde_json::from_str(r#"{"last_observed_index":3}"#).unwrap();
        assert_eq!(loaded.last_observed_index, Some(3));
        assert!(loaded.retired.is_empty());
    }
}
