/// Synchronization loop
///
/// Runs the startup pass, then serves two concurrent paths against the
/// coordinator's shared state: a periodic scan tick and a listener applying
/// change notifications.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::manager::SyncCoordinator;
use super::state::SyncPhase;
use crate::error::SyncError;
use crate::node::UtxosChanged;

/// Run the engine until `shutdown` resolves.
///
/// Startup failures are returned. A failed tick is logged and the loop simply
/// tries again on the next one; an in-flight tick always completes before
/// shutdown is observed.
pub async fn sync<F>(coordinator: Arc<SyncCoordinator>, shutdown: F) -> Result<(), SyncError>
where
    F: Future<Output = ()>,
{
    let changes = coordinator
        .take_change_receiver()
        .await
        .ok_or(SyncError::AlreadyRunning)?;

    coordinator.initialize().await?;

    let listener = tokio::spawn(listen_for_changes(Arc::clone(&coordinator), changes));
    if let Err(e) = coordinator.start_watching().await {
        listener.abort();
        return Err(e);
    }

    let mut ticker = tokio::time::interval(coordinator.sync_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately and the startup pass already covered it
    ticker.tick().await;

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested, stopping sync loop");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = tick(&coordinator).await {
                    coordinator.record_failed_tick();
                    log::warn!("Sync tick failed, retrying next tick: {}", e);
                }
            }
        }
    }

    listener.abort();
    Ok(())
}

/// One periodic round: recent scan, far scan, then widen the notification
/// scope if new addresses turned up.
pub async fn tick(coordinator: &SyncCoordinator) -> Result<(), SyncError> {
    let watching = coordinator.phase().await == SyncPhase::Watching;
    if watching {
        coordinator.set_phase(SyncPhase::Discovering).await;
    }

    let result = scan_round(coordinator).await;

    if watching {
        coordinator.set_phase(SyncPhase::Watching).await;
    }
    result
}

async fn scan_round(coordinator: &SyncCoordinator) -> Result<(), SyncError> {
    coordinator.collect_recent_addresses().await?;
    coordinator.collect_far_addresses().await?;
    coordinator.refresh_watch_scope().await
}

async fn listen_for_changes(
    coordinator: Arc<SyncCoordinator>,
    mut changes: mpsc::UnboundedReceiver<UtxosChanged>,
) {
    while let Some(notification) = changes.recv().await {
        if notification.is_empty() {
            continue;
        }
        coordinator.on_utxos_changed(notification).await;
    }
    log::debug!("UTXO change channel closed");
}
