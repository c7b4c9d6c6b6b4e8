use serde::Serialize;

use super::types::{AddressBook, UtxoSet};
use crate::storage::PersistedIndices;

/// Lifecycle of the sync engine. There is no terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncPhase {
    Uninitialized,
    Discovering,
    Watching,
}

/// Everything the coordinator's lock guards, mutated as one unit.
#[derive(Debug)]
pub struct SyncState {
    pub address_book: AddressBook,
    pub utxo_set: UtxoSet,
    pub indices: PersistedIndices,
    pub phase: SyncPhase,
    /// Set once the startup scan + resync completed
    pub initial_pass_complete: bool,
    /// Address book size at the last notification subscription
    pub watched_addresses: usize,
    /// Bumped by every applied change notification
    pub notifications_applied: u64,
}

impl SyncState {
    /// Fresh state resuming from previously persisted indices.
    pub fn new(indices: PersistedIndices) -> Self {
        Self {
            address_book: AddressBook::new(),
            utxo_set: UtxoSet::new(),
            indices,
            phase: SyncPhase::Uninitialized,
            initial_pass_complete: false,
            watched_addresses: 0,
            notifications_applied: 0,
        }
    }

    /// Heuristic readiness: the far scan has moved past every used index.
    pub fn is_synced(&self) -> bool {
        self.indices.far_scan_cursor > self.indices.last_used_external_index
            && self.indices.far_scan_cursor > self.indices.last_used_internal_index
    }

    pub fn sync_state_report(&self) -> String {
        format!(
            "phase {:?}, far scan cursor at index {} (last used external index {}, last used internal index {}), {} known addresses, {} UTXOs",
            self.phase,
            self.indices.far_scan_cursor,
            self.indices.last_used_external_index,
            self.indices.last_used_internal_index,
            self.address_book.len(),
            self.utxo_set.len(),
        )
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new(PersistedIndices::default())
    }
}
