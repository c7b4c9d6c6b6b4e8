//! Sync instrumentation
//!
//! Counters are collected through an injected [`SyncMetrics`] handle rather
//! than process-wide globals, so tests and embedders can observe (or ignore)
//! them independently.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Collector interface the sync engine reports into.
pub trait SyncMetrics: Send + Sync {
    /// One `scan_range` batch completed.
    fn record_scan_batch(&self, queried_addresses: usize, discovered_addresses: usize);

    /// One change notification was applied.
    fn record_notification(&self, added: usize, removed: usize, dropped: usize);

    /// The UTXO set was replaced by a full resync.
    fn record_full_resync(&self, entries: usize);

    /// A periodic tick aborted with an error.
    fn record_failed_tick(&self);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl SyncMetrics for NoopMetrics {
    fn record_scan_batch(&self, _: usize, _: usize) {}
    fn record_notification(&self, _: usize, _: usize, _: usize) {}
    fn record_full_resync(&self, _: usize) {}
    fn record_failed_tick(&self) {}
}

/// Lock-free counters, readable at any time through [`AtomicSyncMetrics::snapshot`].
#[derive(Debug, Default)]
pub struct AtomicSyncMetrics {
    scan_batches: AtomicU64,
    queried_addresses: AtomicU64,
    discovered_addresses: AtomicU64,
    notifications: AtomicU64,
    utxos_added: AtomicU64,
    utxos_removed: AtomicU64,
    utxos_dropped: AtomicU64,
    full_resyncs: AtomicU64,
    failed_ticks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub scan_batches: u64,
    pub queried_addresses: u64,
    pub discovered_addresses: u64,
    pub notifications: u64,
    pub utxos_added: u64,
    pub utxos_removed: u64,
    pub utxos_dropped: u64,
    pub full_resyncs: u64,
    pub failed_ticks: u64,
}

impl AtomicSyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scan_batches: self.scan_batches.load(Ordering::Relaxed),
            queried_addresses: self.queried_addresses.load(Ordering::Relaxed),
            discovered_addresses: self.discovered_addresses.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
            utxos_added: self.utxos_added.load(Ordering::Relaxed),
            utxos_removed: self.utxos_removed.load(Ordering::Relaxed),
            utxos_dropped: self.utxos_dropped.load(Ordering::Relaxed),
            full_resyncs: self.full_resyncs.load(Ordering::Relaxed),
            failed_ticks: self.failed_ticks.load(Ordering::Relaxed),
        }
    }
}

impl SyncMetrics for AtomicSyncMetrics {
    fn record_scan_batch(&self, queried_addresses: usize, discovered_addresses: usize) {
        self.scan_batches.fetch_add(1, Ordering::Relaxed);
        self.queried_addresses
            .fetch_add(queried_addresses as u64, Ordering::Relaxed);
        self.discovered_addresses
            .fetch_add(discovered_addresses as u64, Ordering::Relaxed);
    }

    fn record_notification(&self, added: usize, removed: usize, dropped: usize) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
        self.utxos_added.fetch_add(added as u64, Ordering::Relaxed);
        self.utxos_removed.fetch_add(removed as u64, Ordering::Relaxed);
        self.utxos_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
    }

    fn record_full_resync(&self, _entries: usize) {
        self.full_resyncs.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed_tick(&self) {
        self.failed_ticks.fetch_add(1, Ordering::Relaxed);
    }
}
