use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::NodeError;
use crate::wallet::types::{Outpoint, UtxoEntry};

/// Balance of one queried address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressBalance {
    pub address: String,
    pub balance: u64,
}

/// One output as reported by the node, tagged with the address it pays to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoByAddress {
    pub address: String,
    pub outpoint: Outpoint,
    pub utxo_entry: UtxoEntry,
}

/// Push notification: outputs that appeared and disappeared for the
/// subscribed addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxosChanged {
    pub added: Vec<UtxoByAddress>,
    pub removed: Vec<UtxoByAddress>,
    pub received_at: DateTime<Utc>,
}

impl UtxosChanged {
    pub fn new(added: Vec<UtxoByAddress>, removed: Vec<UtxoByAddress>) -> Self {
        Self {
            added,
            removed,
            received_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Where a subscription delivers its notifications.
pub type UtxoChangeSink = mpsc::UnboundedSender<UtxosChanged>;

/// Operations the sync engine needs from a full node.
///
/// Delivery through `subscribe_utxo_changes` is best-effort: at most once per
/// event, with no ordering relative to other calls.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn query_balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, NodeError>;

    async fn query_utxos(&self, addresses: &[String]) -> Result<Vec<UtxoByAddress>, NodeError>;

    /// Register `sink` for changes on `addresses`, replacing any earlier
    /// subscription.
    async fn subscribe_utxo_changes(
        &self,
        addresses: Vec<String>,
        sink: UtxoChangeSink,
    ) -> Result<(), NodeError>;
}

/// Bound a remote call by `timeout`.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(NodeError::Timeout(timeout)),
    }
}
