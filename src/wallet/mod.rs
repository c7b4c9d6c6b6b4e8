/// Wallet Sync Core
///
/// - `types.rs` - Coordinates, address book, UTXO set
/// - `address_manager.rs` - Coordinate to address derivation
/// - `scan_ops.rs` - Gap-limit address discovery
/// - `utxo_ops.rs` - Full resync and incremental UTXO updates
/// - `state.rs` - State guarded by the coordinator lock
/// - `manager.rs` - Coordinator over all of the above
/// - `sync_ops.rs` - Periodic loop and notification listener
/// - `address_ops.rs` - Receive/change address issuance

pub mod address_manager;
pub mod address_ops;
pub mod manager;
pub mod scan_ops;
pub mod state;
pub mod sync_ops;
pub mod types;
pub mod utxo_ops;

pub use address_manager::{AddressDeriver, KeyChainAddresser};
pub use manager::SyncCoordinator;
pub use scan_ops::{GapScanner, ScanOutcome};
pub use state::{SyncPhase, SyncState};
pub use types::{
    AddressBook, KeyChain, Outpoint, UtxoEntry, UtxoSet, WalletAddressCoordinate, WalletUtxo,
};
