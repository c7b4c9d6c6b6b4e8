//! Remote node collaborator
//!
//! - `client.rs` - the `NodeClient` contract the sync engine calls
//! - `esplora.rs` - `NodeClient` over an Esplora HTTP API

pub mod client;
pub mod esplora;

pub use client::{
    with_timeout, AddressBalance, NodeClient, UtxoByAddress, UtxoChangeSink, UtxosChanged,
};
pub use esplora::EsploraNode;
