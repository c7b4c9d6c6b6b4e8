/// UTXO set maintenance
///
/// Two update paths keep the local UTXO set in line with the node: a full
/// replace from a snapshot, and incremental deltas from change notifications.
use super::state::SyncState;
use super::types::{UtxoSet, WalletUtxo};
use crate::error::SyncError;
use crate::node::{UtxoByAddress, UtxosChanged};

/// What one incremental apply did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtxoChangeSummary {
    pub added: usize,
    pub removed: usize,
    /// Added entries for addresses the address book does not know (yet)
    pub dropped: usize,
}

/// Replace the whole UTXO set with `entries`.
///
/// Every entry must pay to an address already in the address book; otherwise
/// the call fails and the current set is left as it was.
pub fn apply_full_resync(state: &mut SyncState, entries: Vec<UtxoByAddress>) -> Result<(), SyncError> {
    let mut utxos = UtxoSet::new();

    for entry in entries {
        if !state.address_book.contains(&entry.address) {
            return Err(SyncError::Consistency {
                address: entry.address,
            });
        }

        utxos.insert(WalletUtxo {
            outpoint: entry.outpoint,
            utxo_entry: entry.utxo_entry,
            address: entry.address,
        });
    }

    state.utxo_set = utxos;
    Ok(())
}

/// Apply one change notification. Removals go first, then additions.
///
/// Removing an absent outpoint is a no-op, so redelivery is harmless. Added
/// entries for unknown addresses are dropped; the next scan picks their
/// balance up.
pub fn apply_utxo_changes(state: &mut SyncState, changes: &UtxosChanged) -> UtxoChangeSummary {
    let mut summary = UtxoChangeSummary::default();
    state.notifications_applied = state.notifications_applied.wrapping_add(1);

    for entry in &changes.removed {
        if !state.address_book.contains(&entry.address) {
            continue;
        }
        if state.utxo_set.remove(&entry.outpoint).is_some() {
            summary.removed += 1;
        }
    }

    for entry in &changes.added {
        if !state.address_book.contains(&entry.address) {
            log::warn!(
                "Dropping UTXO {} for address {} which is not watched yet",
                entry.outpoint,
                entry.address
            );
            summary.dropped += 1;
            continue;
        }

        state.utxo_set.insert(WalletUtxo {
            outpoint: entry.outpoint,
            utxo_entry: entry.utxo_entry.clone(),
            address: entry.address.clone(),
        });
        summary.added += 1;
    }

    summary
}

/// UTXOs ordered by amount, largest first, for spend selection.
pub fn utxos_sorted_by_amount(utxo_set: &UtxoSet) -> Vec<WalletUtxo> {
    let mut utxos: Vec<WalletUtxo> = utxo_set.values().cloned().collect();
    utxos.sort_by(|a, b| {
        b.utxo_entry
            .amount
            .cmp(&a.utxo_entry.amount)
            .then_with(|| a.outpoint.cmp(&b.outpoint))
    });
    utxos
}
