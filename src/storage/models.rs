//! Data models for wallet storage

use serde::{Deserialize, Serialize};

/// Extended public key configuration of the wallet.
///
/// One key means a single-signer wallet, more than one a multisig wallet
/// where `cosigner_index` is this participant's position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysFile {
    pub extended_public_keys: Vec<String>,
    pub minimum_signatures: u32,
    pub cosigner_index: u32,
}

impl KeysFile {
    pub fn single_signer(xpub: impl Into<String>) -> Self {
        Self {
            extended_public_keys: vec![xpub.into()],
            minimum_signatures: 1,
            cosigner_index: 0,
        }
    }

    pub fn num_cosigners(&self) -> u32 {
        self.extended_public_keys.len() as u32
    }

    pub fn is_multisig(&self) -> bool {
        self.extended_public_keys.len() > 1
    }
}

/// The only scan state that has to survive a restart. Every field only
/// ever increases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIndices {
    pub last_used_external_index: u32,
    pub last_used_internal_index: u32,
    pub far_scan_cursor: u32,
}

impl PersistedIndices {
    pub fn max_used_index(&self) -> u32 {
        self.last_used_external_index
            .max(self.last_used_internal_index)
    }
}
