//! Common test utilities for wallet sync integration tests
//!
//! This module provides shared test infrastructure including:
//! - An in-process `MockNode` with scripted balances and UTXOs
//! - A deterministic address deriver with readable addresses
//! - Test environment setup with automatic cleanup
#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, Txid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use wallet_sync::error::{NodeError, SyncError};
use wallet_sync::metrics::{AtomicSyncMetrics, SyncMetrics};
use wallet_sync::node::{AddressBalance, NodeClient, UtxoByAddress, UtxoChangeSink, UtxosChanged};
use wallet_sync::storage::Storage;
use wallet_sync::wallet::{
    AddressDeriver, GapScanner, KeyChain, Outpoint, SyncCoordinator, UtxoEntry,
    WalletAddressCoordinate,
};
use wallet_sync::SyncConfig;

pub const RECENT_BATCH: u32 = 100;
pub const FAR_BATCH: u32 = 50;

/// Readable address for a coordinate, matching `TestDeriver`.
pub fn address(index: u32, cosigner_index: u32, key_chain: KeyChain) -> String {
    let branch = match key_chain {
        KeyChain::External => "ext",
        KeyChain::Internal => "int",
    };
    format!("addr-{}-{}-{}", cosigner_index, branch, index)
}

pub fn external(index: u32) -> String {
    address(index, 0, KeyChain::External)
}

pub fn internal(index: u32) -> String {
    address(index, 0, KeyChain::Internal)
}

pub fn outpoint(tx_byte: u8, index: u32) -> Outpoint {
    Outpoint::new(Txid::from_byte_array([tx_byte; 32]), index)
}

pub fn utxo(address: &str, tx_byte: u8, index: u32, amount: u64) -> UtxoByAddress {
    UtxoByAddress {
        address: address.to_string(),
        outpoint: outpoint(tx_byte, index),
        utxo_entry: UtxoEntry {
            amount,
            script_public_key: ScriptBuf::new(),
            block_daa_score: 1_000,
            is_coinbase: false,
        },
    }
}

/// Deterministic deriver producing `addr-<cosigner>-<ext|int>-<index>`.
pub struct TestDeriver {
    pub cosigners: u32,
}

impl AddressDeriver for TestDeriver {
    fn derive_address(&self, coordinate: &WalletAddressCoordinate) -> Result<String, SyncError> {
        if coordinate.cosigner_index >= self.cosigners {
            return Err(SyncError::Derivation("cosigner out of range".into()));
        }
        Ok(address(
            coordinate.index,
            coordinate.cosigner_index,
            coordinate.key_chain,
        ))
    }

    fn num_cosigners(&self) -> u32 {
        self.cosigners
    }
}

/// Scripted node. Every requested address gets a balance entry (zero unless
/// funded); UTXO queries return the scripted outputs of the requested
/// addresses.
#[derive(Default)]
pub struct MockNode {
    balances: Mutex<HashMap<String, u64>>,
    utxos: Mutex<Vec<UtxoByAddress>>,
    extra_balance_entries: Mutex<Vec<AddressBalance>>,
    subscription: Mutex<Option<(Vec<String>, UtxoChangeSink)>>,
    balance_batches: Mutex<Vec<usize>>,
    delay: Mutex<Option<Duration>>,
    utxo_reply_delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
    pub utxo_calls: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fund(&self, address: &str, balance: u64) {
        self.balances
            .lock()
            .unwrap()
            .insert(address.to_string(), balance);
    }

    pub fn add_utxo(&self, utxo: UtxoByAddress) {
        let mut balances = self.balances.lock().unwrap();
        *balances.entry(utxo.address.clone()).or_insert(0) += utxo.utxo_entry.amount;
        self.utxos.lock().unwrap().push(utxo);
    }

    /// Answer the next balance queries with an entry nobody asked for.
    pub fn inject_unrequested_balance(&self, address: &str, balance: u64) {
        self.extra_balance_entries.lock().unwrap().push(AddressBalance {
            address: address.to_string(),
            balance,
        });
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Take UTXO snapshots immediately but hold the reply back, so changes
    /// made meanwhile are missing from what the caller receives.
    pub fn set_utxo_reply_delay(&self, delay: Option<Duration>) {
        *self.utxo_reply_delay.lock().unwrap() = delay;
    }

    /// Number of addresses in each balance query, in call order.
    pub fn balance_batches(&self) -> Vec<usize> {
        self.balance_batches.lock().unwrap().clone()
    }

    pub fn subscribed_addresses(&self) -> Option<Vec<String>> {
        self.subscription
            .lock()
            .unwrap()
            .as_ref()
            .map(|(addresses, _)| addresses.clone())
    }

    /// Apply a change to the scripted outputs and deliver it through the
    /// current subscription.
    pub fn push_changes(&self, added: Vec<UtxoByAddress>, removed: Vec<UtxoByAddress>) -> bool {
        {
            let mut utxos = self.utxos.lock().unwrap();
            utxos.retain(|utxo| !removed.iter().any(|r| r.outpoint == utxo.outpoint));
            utxos.extend(added.iter().cloned());
        }

        let subscription = self.subscription.lock().unwrap();
        match subscription.as_ref() {
            Some((_, sink)) => sink.send(UtxosChanged::new(added, removed)).is_ok(),
            None => false,
        }
    }

    async fn before_call(&self) -> Result<(), NodeError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(NodeError::Network("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn query_balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, NodeError> {
        self.before_call().await?;
        self.balance_batches.lock().unwrap().push(addresses.len());

        let balances = self.balances.lock().unwrap();
        let mut entries: Vec<AddressBalance> = addresses
            .iter()
            .map(|address| AddressBalance {
                address: address.clone(),
                balance: balances.get(address).copied().unwrap_or(0),
            })
            .collect();
        entries.extend(self.extra_balance_entries.lock().unwrap().iter().cloned());
        Ok(entries)
    }

    async fn query_utxos(&self, addresses: &[String]) -> Result<Vec<UtxoByAddress>, NodeError> {
        self.before_call().await?;
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);

        let snapshot: Vec<UtxoByAddress> = self
            .utxos
            .lock()
            .unwrap()
            .iter()
            .filter(|utxo| addresses.contains(&utxo.address))
            .cloned()
            .collect();

        let reply_delay = *self.utxo_reply_delay.lock().unwrap();
        if let Some(delay) = reply_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(snapshot)
    }

    async fn subscribe_utxo_changes(
        &self,
        addresses: Vec<String>,
        sink: UtxoChangeSink,
    ) -> Result<(), NodeError> {
        self.before_call().await?;
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        *self.subscription.lock().unwrap() = Some((addresses, sink));
        Ok(())
    }
}

/// Test environment with automatic cleanup
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub node: Arc<MockNode>,
    pub config: SyncConfig,
    pub metrics: Arc<AtomicSyncMetrics>,
    pub cosigners: u32,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_cosigners(1)
    }

    pub fn with_cosigners(cosigners: u32) -> anyhow::Result<Self> {
        let temp_dir = TempDir::new()?;
        log::info!("Test directory: {:?}", temp_dir.path());

        let config = SyncConfig {
            network: bitcoin::Network::Regtest,
            data_dir: temp_dir.path().to_path_buf(),
            recent_batch_size: RECENT_BATCH,
            far_batch_size: FAR_BATCH,
            sync_interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
            ..Default::default()
        };

        Ok(Self {
            temp_dir,
            node: MockNode::new(),
            config,
            metrics: Arc::new(AtomicSyncMetrics::new()),
            cosigners,
        })
    }

    pub fn storage(&self) -> Storage {
        Storage::new_with_base_dir(self.temp_dir.path().to_path_buf())
    }

    pub fn deriver(&self) -> Arc<dyn AddressDeriver> {
        Arc::new(TestDeriver {
            cosigners: self.cosigners,
        })
    }

    /// A coordinator over the mock node, resuming from whatever indices are
    /// persisted in the temp dir.
    pub fn coordinator(&self) -> Result<Arc<SyncCoordinator>, SyncError> {
        let metrics: Arc<dyn SyncMetrics> = self.metrics.clone();
        Ok(Arc::new(SyncCoordinator::with_metrics(
            &self.config,
            self.node.clone(),
            self.deriver(),
            self.storage(),
            0,
            metrics,
        )?))
    }

    pub fn scanner(&self) -> GapScanner {
        GapScanner::new(
            self.node.clone(),
            self.deriver(),
            self.storage(),
            self.config.request_timeout,
            self.metrics.clone(),
        )
    }
}

/// Poll `condition` until it holds, failing the test after a few seconds.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
