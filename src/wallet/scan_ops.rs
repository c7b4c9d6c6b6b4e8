/// Address discovery
///
/// Derives every coordinate in an index range, asks the node for their
/// balances in one batch and folds funded addresses back into the address
/// book and the persisted last-used indices.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::address_manager::AddressDeriver;
use super::state::SyncState;
use super::types::{KeyChain, WalletAddressCoordinate};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::node::{with_timeout, AddressBalance, NodeClient};
use crate::storage::{PersistedIndices, Storage};

/// Addresses derived for one scan batch, keyed by address string.
pub type WalletAddressSet = HashMap<String, WalletAddressCoordinate>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Addresses sent to the node
    pub queried: usize,
    /// Funded addresses that were not in the address book yet
    pub discovered: usize,
}

pub struct GapScanner {
    node: Arc<dyn NodeClient>,
    deriver: Arc<dyn AddressDeriver>,
    storage: Storage,
    request_timeout: Duration,
    metrics: Arc<dyn SyncMetrics>,
}

impl GapScanner {
    pub fn new(
        node: Arc<dyn NodeClient>,
        deriver: Arc<dyn AddressDeriver>,
        storage: Storage,
        request_timeout: Duration,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Self {
        Self {
            node,
            deriver,
            storage,
            request_timeout,
            metrics,
        }
    }

    /// Every address in `[start, end)`, for every cosigner and both keychains.
    /// Each cosigner of a multisig wallet has its own derivation path, so the
    /// batch holds `(end - start) * cosigners * 2` addresses.
    pub fn addresses_to_query(&self, start: u32, end: u32) -> Result<WalletAddressSet, SyncError> {
        let cosigners = self.deriver.num_cosigners();
        let capacity = (end.saturating_sub(start) as usize) * cosigners as usize * KeyChain::ALL.len();
        let mut addresses = WalletAddressSet::with_capacity(capacity);

        for index in start..end {
            for cosigner_index in 0..cosigners {
                for key_chain in KeyChain::ALL {
                    let coordinate = WalletAddressCoordinate::new(index, cosigner_index, key_chain);
                    let address = self.deriver.derive_address(&coordinate)?;
                    addresses.insert(address, coordinate);
                }
            }
        }

        Ok(addresses)
    }

    /// Scan `[start, end)` and commit what was found.
    ///
    /// The response is validated and the raised indices persisted before any
    /// in-memory state changes, so a failure leaves `state` untouched.
    pub async fn scan_range(
        &self,
        state: &mut SyncState,
        start: u32,
        end: u32,
    ) -> Result<ScanOutcome, SyncError> {
        if end <= start {
            return Err(SyncError::InvalidRange { start, end });
        }

        let requested = self.addresses_to_query(start, end)?;
        let addresses: Vec<String> = requested.keys().cloned().collect();

        let balances = with_timeout(self.request_timeout, self.node.query_balances(&addresses)).await?;

        let (funded, updated) = fold_balances(&requested, &balances, state.indices)?;

        if updated != state.indices {
            self.storage.save_indices(&updated)?;
        }

        let mut discovered = 0;
        for (address, coordinate) in funded {
            if !state.address_book.contains(&address) {
                discovered += 1;
            }
            state.address_book.insert(address, coordinate);
        }
        state.indices = updated;

        log::debug!(
            "Scanned indices [{}, {}): {} addresses queried, {} newly discovered",
            start,
            end,
            addresses.len(),
            discovered
        );
        self.metrics.record_scan_batch(addresses.len(), discovered);

        Ok(ScanOutcome {
            queried: addresses.len(),
            discovered,
        })
    }
}

/// Pick out the funded addresses and raise the last-used indices accordingly.
/// Zero-balance entries are dropped so the address book only ever holds
/// addresses that were funded at some point.
fn fold_balances(
    requested: &WalletAddressSet,
    balances: &[AddressBalance],
    current: PersistedIndices,
) -> Result<(Vec<(String, WalletAddressCoordinate)>, PersistedIndices), SyncError> {
    let mut updated = current;
    let mut funded = Vec::new();

    for entry in balances {
        let coordinate = requested
            .get(&entry.address)
            .ok_or_else(|| SyncError::UnrequestedAddress(entry.address.clone()))?;

        if entry.balance == 0 {
            continue;
        }

        match coordinate.key_chain {
            KeyChain::External => {
                updated.last_used_external_index =
                    updated.last_used_external_index.max(coordinate.index)
            }
            KeyChain::Internal => {
                updated.last_used_internal_index =
                    updated.last_used_internal_index.max(coordinate.index)
            }
        }
        funded.push((entry.address.clone(), *coordinate));
    }

    Ok((funded, updated))
}
