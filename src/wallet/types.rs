//! Core wallet data model: derivation coordinates, the address book and the
//! UTXO cache.

use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// HD derivation branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyChain {
    /// Receive addresses
    External,
    /// Change addresses
    Internal,
}

impl KeyChain {
    pub const ALL: [KeyChain; 2] = [KeyChain::External, KeyChain::Internal];

    /// Path component used for this branch.
    pub fn as_u32(self) -> u32 {
        match self {
            KeyChain::External => 0,
            KeyChain::Internal => 1,
        }
    }
}

impl fmt::Display for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyChain::External => write!(f, "external"),
            KeyChain::Internal => write!(f, "internal"),
        }
    }
}

/// Position of one address in the wallet's derivation space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletAddressCoordinate {
    pub index: u32,
    pub cosigner_index: u32,
    pub key_chain: KeyChain,
}

impl WalletAddressCoordinate {
    pub fn new(index: u32, cosigner_index: u32, key_chain: KeyChain) -> Self {
        Self {
            index,
            cosigner_index,
            key_chain,
        }
    }
}

/// Addresses the engine knows about and watches, keyed by address string.
///
/// Only grows: an address enters once a scan saw a nonzero balance on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook {
    entries: HashMap<String, WalletAddressCoordinate>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, address: String, coordinate: WalletAddressCoordinate) {
        self.entries.insert(address, coordinate);
    }

    pub fn get(&self, address: &str) -> Option<&WalletAddressCoordinate> {
        self.entries.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All watched address strings, in no particular order.
    pub fn addresses(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &WalletAddressCoordinate)> {
        self.entries.iter()
    }
}

/// Reference to one output of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub transaction_id: Txid,
    pub output_index: u32,
}

impl Outpoint {
    pub fn new(transaction_id: Txid, output_index: u32) -> Self {
        Self {
            transaction_id,
            output_index,
        }
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub amount: u64,
    pub script_public_key: ScriptBuf,
    pub block_daa_score: u64,
    pub is_coinbase: bool,
}

/// An unspent output owned by the wallet.
///
/// `address` is a lookup key into the [`AddressBook`], never an owner of
/// the book entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletUtxo {
    pub outpoint: Outpoint,
    pub utxo_entry: UtxoEntry,
    pub address: String,
}

impl WalletUtxo {
    pub fn owner_coordinate<'a>(
        &self,
        book: &'a AddressBook,
    ) -> Option<&'a WalletAddressCoordinate> {
        book.get(&self.address)
    }
}

/// Local cache of the wallet's spendable outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: HashMap<Outpoint, WalletUtxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utxo: WalletUtxo) {
        self.entries.insert(utxo.outpoint, utxo);
    }

    pub fn remove(&mut self, outpoint: &Outpoint) -> Option<WalletUtxo> {
        self.entries.remove(outpoint)
    }

    pub fn get(&self, outpoint: &Outpoint) -> Option<&WalletUtxo> {
        self.entries.get(outpoint)
    }

    pub fn contains(&self, outpoint: &Outpoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &WalletUtxo> {
        self.entries.values()
    }

    pub fn total_amount(&self) -> u64 {
        self.entries
            .values()
            .map(|utxo| utxo.utxo_entry.amount)
            .sum()
    }
}
