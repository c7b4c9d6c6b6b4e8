use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::address_manager::{AddressDeriver, KeyChainAddresser};
use super::scan_ops::GapScanner;
use super::state::{SyncPhase, SyncState};
use super::types::{AddressBook, UtxoSet, WalletUtxo};
use super::utxo_ops;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics::{NoopMetrics, SyncMetrics};
use crate::node::{
    with_timeout, EsploraNode, NodeClient, UtxoByAddress, UtxoChangeSink, UtxosChanged,
};
use crate::storage::{PersistedIndices, Storage};

const RESYNC_ATTEMPTS: usize = 3;

/// Orchestrates address discovery and UTXO tracking.
///
/// The address book, UTXO set and persisted indices live behind a single
/// lock. Scans hold it for one batch's round trip at a time; full resyncs
/// query the node without it and only take it to swap the result in.
pub struct SyncCoordinator {
    pub(super) node: Arc<dyn NodeClient>,
    pub(super) deriver: Arc<dyn AddressDeriver>,
    pub(super) scanner: GapScanner,
    pub(super) storage: Storage,
    pub(super) cosigner_index: u32,
    pub(super) state: RwLock<SyncState>,
    pub(super) metrics: Arc<dyn SyncMetrics>,
    recent_batch_size: u32,
    far_batch_size: u32,
    sync_interval: Duration,
    request_timeout: Duration,
    changes_tx: UtxoChangeSink,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<UtxosChanged>>>,
}

impl SyncCoordinator {
    /// Build a coordinator over the Esplora node and the keys stored in `config.data_dir`.
    pub fn open(config: &SyncConfig) -> Result<Self, SyncError> {
        config.validate()?;

        let storage = Storage::new_with_base_dir(config.data_dir.clone());
        let keys = storage.load_keys()?;
        let deriver = Arc::new(KeyChainAddresser::new(&keys, config.network)?);
        let node = Arc::new(EsploraNode::new(config)?);

        log::info!(
            "Loaded {} wallet with {} cosigner key(s) from {}",
            if keys.is_multisig() { "multisig" } else { "single-signer" },
            keys.num_cosigners(),
            storage.base_dir().display()
        );

        Self::new(config, node, deriver, storage, keys.cosigner_index)
    }

    pub fn new(
        config: &SyncConfig,
        node: Arc<dyn NodeClient>,
        deriver: Arc<dyn AddressDeriver>,
        storage: Storage,
        cosigner_index: u32,
    ) -> Result<Self, SyncError> {
        Self::with_metrics(config, node, deriver, storage, cosigner_index, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        config: &SyncConfig,
        node: Arc<dyn NodeClient>,
        deriver: Arc<dyn AddressDeriver>,
        storage: Storage,
        cosigner_index: u32,
        metrics: Arc<dyn SyncMetrics>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        if cosigner_index >= deriver.num_cosigners() {
            return Err(SyncError::Derivation(format!(
                "cosigner index {} out of range for {} cosigner(s)",
                cosigner_index,
                deriver.num_cosigners()
            )));
        }

        let indices = storage.load_indices()?;
        log::debug!("Resuming from persisted indices {:?}", indices);

        let scanner = GapScanner::new(
            Arc::clone(&node),
            Arc::clone(&deriver),
            storage.clone(),
            config.request_timeout,
            Arc::clone(&metrics),
        );
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();

        Ok(Self {
            node,
            deriver,
            scanner,
            storage,
            cosigner_index,
            state: RwLock::new(SyncState::new(indices)),
            metrics,
            recent_batch_size: config.recent_batch_size,
            far_batch_size: config.far_batch_size,
            sync_interval: config.sync_interval,
            request_timeout: config.request_timeout,
            changes_tx,
            changes_rx: Mutex::new(Some(changes_rx)),
        })
    }

    /// Startup pass: recent scan to convergence, one far scan step, then a
    /// full UTXO resync. Balance and spend queries are refused until it completes.
    pub async fn initialize(&self) -> Result<(), SyncError> {
        self.set_phase(SyncPhase::Discovering).await;

        self.collect_recent_addresses().await?;
        self.collect_far_addresses().await?;
        self.refresh_utxos().await?;

        let mut state = self.state.write().await;
        state.initial_pass_complete = true;
        log::info!("Initialized: {}", state.sync_state_report());
        Ok(())
    }

    /// Subscribe to change notifications for the current address book and
    /// enter the watching phase.
    pub async fn start_watching(&self) -> Result<(), SyncError> {
        let watched = self.subscribe_watched().await.map_err(|e| {
            log::error!("Failed to register for UTXO change notifications: {}", e);
            e
        })?;

        let mut state = self.state.write().await;
        state.watched_addresses = watched;
        state.phase = SyncPhase::Watching;
        log::info!("Watching {} addresses for UTXO changes", watched);
        Ok(())
    }

    /// Scan from index 0 in batches until the scan is at least one batch past
    /// the highest used index. The lock is released between batches and the
    /// used index re-read from state, so bumps from elsewhere extend the scan.
    pub async fn collect_recent_addresses(&self) -> Result<(), SyncError> {
        let batch = self.recent_batch_size;
        let mut index = 0u32;
        let mut max_used_index = 0u32;

        while index < max_used_index.saturating_add(batch) {
            let end = index.saturating_add(batch);
            if end == index {
                break;
            }

            {
                let mut state = self.state.write().await;
                self.scanner.scan_range(&mut state, index, end).await?;
            }

            max_used_index = self.max_used_index().await;
            index = end;
        }

        // the far scan need not re-explore what was just covered
        let mut state = self.state.write().await;
        if index > state.indices.far_scan_cursor {
            let updated = PersistedIndices {
                far_scan_cursor: index,
                ..state.indices
            };
            self.storage.save_indices(&updated)?;
            state.indices = updated;
        }
        Ok(())
    }

    /// Explore one batch past the far-scan cursor, then advance it
    /// unconditionally.
    pub async fn collect_far_addresses(&self) -> Result<(), SyncError> {
        let mut state = self.state.write().await;
        let start = state.indices.far_scan_cursor;
        let end = start.saturating_add(self.far_batch_size);
        if end == start {
            log::debug!("Far scan reached the end of the index space");
            return Ok(());
        }

        self.scanner.scan_range(&mut state, start, end).await?;

        let updated = PersistedIndices {
            far_scan_cursor: end,
            ..state.indices
        };
        self.storage.save_indices(&updated)?;
        state.indices = updated;
        Ok(())
    }

    /// Replace the UTXO set with a fresh snapshot of every watched address.
    ///
    /// The node is queried without the lock. A snapshot is only swapped in if
    /// no change notification was applied while it was in flight, otherwise
    /// it may predate a spend and is fetched again. After
    /// `RESYNC_ATTEMPTS` lost races the query runs under the write lock.
    pub async fn refresh_utxos(&self) -> Result<(), SyncError> {
        for attempt in 1..=RESYNC_ATTEMPTS {
            let (addresses, seen) = {
                let state = self.state.read().await;
                (state.address_book.addresses(), state.notifications_applied)
            };
            let entries =
                with_timeout(self.request_timeout, self.node.query_utxos(&addresses)).await?;

            let mut state = self.state.write().await;
            if state.notifications_applied != seen {
                log::debug!(
                    "UTXO notification arrived during full resync (attempt {}), querying again",
                    attempt
                );
                continue;
            }
            return self.swap_in_snapshot(&mut state, entries, addresses.len());
        }

        let mut state = self.state.write().await;
        let addresses = state.address_book.addresses();
        let entries = with_timeout(self.request_timeout, self.node.query_utxos(&addresses)).await?;
        self.swap_in_snapshot(&mut state, entries, addresses.len())
    }

    fn swap_in_snapshot(
        &self,
        state: &mut SyncState,
        entries: Vec<UtxoByAddress>,
        address_count: usize,
    ) -> Result<(), SyncError> {
        let count = entries.len();
        utxo_ops::apply_full_resync(state, entries)?;
        self.metrics.record_full_resync(count);
        log::debug!(
            "Full resync: {} UTXOs across {} addresses",
            count,
            address_count
        );
        Ok(())
    }

    /// Re-subscribe and resync if scans discovered addresses since the last
    /// subscription, so their outputs get tracked.
    pub async fn refresh_watch_scope(&self) -> Result<(), SyncError> {
        let (known, watched) = {
            let state = self.state.read().await;
            (state.address_book.len(), state.watched_addresses)
        };
        if known <= watched {
            return Ok(());
        }

        log::info!(
            "Address book grew from {} to {} addresses, refreshing watch scope",
            watched,
            known
        );
        let subscribed = self.subscribe_watched().await?;
        self.refresh_utxos().await?;
        self.state.write().await.watched_addresses = subscribed;
        Ok(())
    }

    /// Apply one change notification under the lock. Never fails: problems
    /// are logged and the next scan or resync reconverges the state.
    pub async fn on_utxos_changed(&self, changes: UtxosChanged) {
        let mut state = self.state.write().await;
        let summary = utxo_ops::apply_utxo_changes(&mut state, &changes);

        log::debug!(
            "UTXO notification received at {}: removed {}, added {}, dropped {}",
            changes.received_at,
            summary.removed,
            summary.added,
            summary.dropped
        );
        self.metrics
            .record_notification(summary.added, summary.removed, summary.dropped);
    }

    pub async fn max_used_index(&self) -> u32 {
        self.state.read().await.indices.max_used_index()
    }

    /// Initial pass done and the far scan is past every used index.
    pub async fn is_synced(&self) -> bool {
        let state = self.state.read().await;
        state.initial_pass_complete && state.is_synced()
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.initial_pass_complete
    }

    pub async fn sync_state_report(&self) -> String {
        self.state.read().await.sync_state_report()
    }

    pub async fn phase(&self) -> SyncPhase {
        self.state.read().await.phase
    }

    pub(super) async fn set_phase(&self, phase: SyncPhase) {
        self.state.write().await.phase = phase;
    }

    pub async fn indices(&self) -> PersistedIndices {
        self.state.read().await.indices
    }

    pub async fn address_book(&self) -> AddressBook {
        self.state.read().await.address_book.clone()
    }

    pub async fn utxo_set(&self) -> UtxoSet {
        self.state.read().await.utxo_set.clone()
    }

    /// Spendable outputs, largest first.
    pub async fn utxos_sorted_by_amount(&self) -> Result<Vec<WalletUtxo>, SyncError> {
        let state = self.state.read().await;
        ensure_synced(&state)?;
        Ok(utxo_ops::utxos_sorted_by_amount(&state.utxo_set))
    }

    pub async fn balance(&self) -> Result<u64, SyncError> {
        let state = self.state.read().await;
        ensure_synced(&state)?;
        Ok(state.utxo_set.total_amount())
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    /// The receiving end of the notification channel. Handed out once, to
    /// the sync loop.
    pub(super) async fn take_change_receiver(
        &self,
    ) -> Option<mpsc::UnboundedReceiver<UtxosChanged>> {
        self.changes_rx.lock().await.take()
    }

    pub(super) fn record_failed_tick(&self) {
        self.metrics.record_failed_tick();
    }

    async fn subscribe_watched(&self) -> Result<usize, SyncError> {
        let addresses = self.state.read().await.address_book.addresses();
        let count = addresses.len();
        with_timeout(
            self.request_timeout,
            self.node
                .subscribe_utxo_changes(addresses, self.changes_tx.clone()),
        )
        .await?;
        Ok(count)
    }
}

pub(super) fn ensure_synced(state: &SyncState) -> Result<(), SyncError> {
    if state.initial_pass_complete && state.is_synced() {
        Ok(())
    } else {
        Err(SyncError::NotSynced(state.sync_state_report()))
    }
}
