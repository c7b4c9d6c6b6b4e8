use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Derivation error: {0}")]
    Derivation(String),

    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Got UTXO entry for address {address} which is not in the address book")]
    Consistency { address: String },

    #[error("Got result from address {0} even though it wasn't requested")]
    UnrequestedAddress(String),

    #[error("Invalid scan range: [{start}, {end})")]
    InvalidRange { start: u32, end: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Wallet daemon is not synced yet, {0}")]
    NotSynced(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Sync loop is already running")]
    AlreadyRunning,
}

/// Failures of the remote node collaborator.
///
/// Always retryable by whoever owns the scheduling loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

impl From<reqwest::Error> for NodeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            // reqwest does not report the configured duration back
            NodeError::Timeout(Duration::ZERO)
        } else if err.is_decode() {
            NodeError::InvalidResponse(err.to_string())
        } else {
            NodeError::Network(err.to_string())
        }
    }
}

impl From<bitcoin::bip32::Error> for SyncError {
    fn from(err: bitcoin::bip32::Error) -> Self {
        SyncError::Derivation(err.to_string())
    }
}
