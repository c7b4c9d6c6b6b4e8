/// Address issuance
///
/// Hands out fresh receive/change addresses on top of the synced state.
/// Refused until the daemon is synced, so an address is never issued below
/// an index the scan has not yet accounted for.
use super::manager::{ensure_synced, SyncCoordinator};
use super::types::{KeyChain, WalletAddressCoordinate};
use crate::error::SyncError;
use crate::storage::PersistedIndices;

impl SyncCoordinator {
    /// Bump the last used external index and return the address there.
    pub async fn new_address(&self) -> Result<String, SyncError> {
        let (address, _) = self.next_address(KeyChain::External).await?;
        Ok(address)
    }

    /// Bump the last used internal index and return the change address there.
    pub async fn change_address(&self) -> Result<(String, WalletAddressCoordinate), SyncError> {
        self.next_address(KeyChain::Internal).await
    }

    /// Every external address issued so far (indices `1..=last used`).
    pub async fn show_addresses(&self) -> Result<Vec<String>, SyncError> {
        let state = self.state.read().await;
        ensure_synced(&state)?;

        (1..=state.indices.last_used_external_index)
            .map(|index| {
                let coordinate =
                    WalletAddressCoordinate::new(index, self.cosigner_index, KeyChain::External);
                self.deriver.derive_address(&coordinate)
            })
            .collect()
    }

    async fn next_address(
        &self,
        key_chain: KeyChain,
    ) -> Result<(String, WalletAddressCoordinate), SyncError> {
        let mut state = self.state.write().await;
        ensure_synced(&state)?;

        let current = match key_chain {
            KeyChain::External => state.indices.last_used_external_index,
            KeyChain::Internal => state.indices.last_used_internal_index,
        };
        let index = current
            .checked_add(1)
            .ok_or_else(|| SyncError::Derivation(format!("{} keychain exhausted", key_chain)))?;

        let coordinate = WalletAddressCoordinate::new(index, self.cosigner_index, key_chain);
        let address = self.deriver.derive_address(&coordinate)?;

        let updated = match key_chain {
            KeyChain::External => PersistedIndices {
                last_used_external_index: index,
                ..state.indices
            },
            KeyChain::Internal => PersistedIndices {
                last_used_internal_index: index,
                ..state.indices
            },
        };
        self.storage.save_indices(&updated)?;
        state.indices = updated;

        log::debug!("Issued {} address {} at index {}", key_chain, address, index);
        Ok((address, coordinate))
    }
}
