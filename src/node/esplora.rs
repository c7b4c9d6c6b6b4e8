use async_trait::async_trait;
use bitcoin::{Address, Network, Txid};
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::client::{AddressBalance, NodeClient, UtxoByAddress, UtxoChangeSink, UtxosChanged};
use crate::config::SyncConfig;
use crate::error::NodeError;
use crate::wallet::types::{Outpoint, UtxoEntry};

/// `NodeClient` backed by an Esplora HTTP API.
///
/// Esplora has no push channel, so change notifications are produced by a
/// background task that polls the subscribed addresses and diffs the results.
pub struct EsploraNode {
    api: EsploraApi,
    poll_interval: Duration,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct EsploraApi {
    client: reqwest::Client,
    base_url: String,
    network: Network,
    max_concurrent_requests: usize,
}

/// GET /address/{address}
#[derive(Debug, Deserialize)]
struct AddressStats {
    chain_stats: TxoStats,
    mempool_stats: TxoStats,
}

#[derive(Debug, Deserialize)]
struct TxoStats {
    funded_txo_sum: u64,
    spent_txo_sum: u64,
}

/// GET /address/{address}/utxo
#[derive(Debug, Deserialize)]
struct UtxoResponse {
    txid: String,
    vout: u32,
    value: u64,
    status: UtxoStatus,
}

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

impl EsploraNode {
    pub fn new(config: &SyncConfig) -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            api: EsploraApi {
                client,
                base_url: config.esplora_url.trim_end_matches('/').to_string(),
                network: config.network,
                max_concurrent_requests: config.max_concurrent_requests,
            },
            poll_interval: config.notification_poll_interval,
            subscription: Mutex::new(None),
        })
    }
}

#[async_trait]
impl NodeClient for EsploraNode {
    async fn query_balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, NodeError> {
        fetch_bounded(addresses, self.api.max_concurrent_requests, |address| {
            self.api.address_balance(address)
        })
        .await
    }

    async fn query_utxos(&self, addresses: &[String]) -> Result<Vec<UtxoByAddress>, NodeError> {
        self.api.utxos(addresses).await
    }

    async fn subscribe_utxo_changes(
        &self,
        addresses: Vec<String>,
        sink: UtxoChangeSink,
    ) -> Result<(), NodeError> {
        let mut subscription = self.subscription.lock().await;
        if let Some(previous) = subscription.take() {
            previous.abort();
        }

        log::debug!(
            "Polling {} addresses for UTXO changes every {:?}",
            addresses.len(),
            self.poll_interval
        );
        let api = self.api.clone();
        let poll_interval = self.poll_interval;
        *subscription = Some(tokio::spawn(poll_changes(api, addresses, poll_interval, sink)));
        Ok(())
    }
}

impl Drop for EsploraNode {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.get_mut().take() {
            handle.abort();
        }
    }
}

impl EsploraApi {
    async fn address_balance(&self, address: &str) -> Result<AddressBalance, NodeError> {
        let url = format!("{}/address/{}", self.base_url, address);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NodeError::Network(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let stats: AddressStats = response.json().await?;
        let confirmed = stats
            .chain_stats
            .funded_txo_sum
            .saturating_sub(stats.chain_stats.spent_txo_sum);
        let unconfirmed = stats
            .mempool_stats
            .funded_txo_sum
            .saturating_sub(stats.mempool_stats.spent_txo_sum);

        Ok(AddressBalance {
            address: address.to_string(),
            balance: confirmed.saturating_add(unconfirmed),
        })
    }

    async fn address_utxos(&self, address: &str) -> Result<Vec<UtxoByAddress>, NodeError> {
        let script_public_key = Address::from_str(address)
            .and_then(|a| a.require_network(self.network))
            .map_err(|e| NodeError::InvalidResponse(format!("{}: {}", address, e)))?
            .script_pubkey();

        let url = format!("{}/address/{}/utxo", self.base_url, address);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(NodeError::Network(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }

        let utxo_list: Vec<UtxoResponse> = response.json().await?;
        utxo_list
            .into_iter()
            .map(|utxo| {
                let txid = Txid::from_str(&utxo.txid)
                    .map_err(|e| NodeError::InvalidResponse(e.to_string()))?;
                let block_daa_score = if utxo.status.confirmed {
                    utxo.status.block_height.unwrap_or(0)
                } else {
                    0
                };

                Ok(UtxoByAddress {
                    address: address.to_string(),
                    outpoint: Outpoint::new(txid, utxo.vout),
                    utxo_entry: UtxoEntry {
                        amount: utxo.value,
                        script_public_key: script_public_key.clone(),
                        block_daa_score,
                        // not exposed by the utxo endpoint
                        is_coinbase: false,
                    },
                })
            })
            .collect()
    }

    async fn utxos(&self, addresses: &[String]) -> Result<Vec<UtxoByAddress>, NodeError> {
        let per_address = fetch_bounded(addresses, self.max_concurrent_requests, |address| {
            self.address_utxos(address)
        })
        .await?;
        Ok(per_address.into_iter().flatten().collect())
    }
}

/// One request per address, at most `limit` in flight, results in input order.
fn fetch_bounded<'a, T, F, Fut>(
    addresses: &'a [String],
    limit: usize,
    fetch: F,
) -> BoxFuture<'a, Result<Vec<T>, NodeError>>
where
    T: Send + 'a,
    F: FnMut(&'a String) -> Fut + Send + 'a,
    Fut: Future<Output = Result<T, NodeError>> + Send + 'a,
{
    stream::iter(addresses)
        .map(fetch)
        .buffered(limit.max(1))
        .try_collect()
        .boxed()
}

async fn poll_changes(
    api: EsploraApi,
    addresses: Vec<String>,
    poll_interval: Duration,
    sink: UtxoChangeSink,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut known = match api.utxos(&addresses).await {
        Ok(utxos) => index_by_outpoint(utxos),
        Err(e) => {
            log::warn!("Initial UTXO poll failed: {}", e);
            HashMap::new()
        }
    };

    loop {
        ticker.tick().await;
        let current = match api.utxos(&addresses).await {
            Ok(utxos) => index_by_outpoint(utxos),
            Err(e) => {
                log::warn!("UTXO poll failed, retrying next interval: {}", e);
                continue;
            }
        };

        let changes = diff_snapshots(&known, &current);
        known = current;
        if changes.is_empty() {
            continue;
        }
        if sink.send(changes).is_err() {
            log::debug!("UTXO change receiver dropped, stopping poller");
            break;
        }
    }
}

fn index_by_outpoint(utxos: Vec<UtxoByAddress>) -> HashMap<Outpoint, UtxoByAddress> {
    utxos.into_iter().map(|utxo| (utxo.outpoint, utxo)).collect()
}

fn diff_snapshots(
    previous: &HashMap<Outpoint, UtxoByAddress>,
    current: &HashMap<Outpoint, UtxoByAddress>,
) -> UtxosChanged {
    let removed = previous
        .iter()
        .filter(|(outpoint, _)| !current.contains_key(outpoint))
        .map(|(_, utxo)| utxo.clone())
        .collect();
    let added = current
        .iter()
        .filter(|(outpoint, _)| !previous.contains_key(outpoint))
        .map(|(_, utxo)| utxo.clone())
        .collect();

    UtxosChanged::new(added, removed)
}
