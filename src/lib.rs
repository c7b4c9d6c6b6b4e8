//! Address discovery and UTXO synchronization for an HD, optionally
//! multisig, wallet daemon sitting in front of a full node.

pub mod config;
pub mod error;
pub mod metrics;
pub mod node;
pub mod storage;
pub mod wallet;

pub use config::SyncConfig;
pub use error::{NodeError, StorageError, SyncError};
pub use wallet::SyncCoordinator;
