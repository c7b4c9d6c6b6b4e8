use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use wallet_sync::wallet::sync_ops;
use wallet_sync::{SyncConfig, SyncCoordinator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize logger (set RUST_LOG=debug for verbose output, RUST_LOG=info for normal)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Optional TOML config file; environment variables override its values
    let config = match env::var("WALLET_SYNC_CONFIG") {
        Ok(path) => SyncConfig::from_file(&PathBuf::from(path))?,
        Err(_) => SyncConfig::from_env(),
    };
    config.validate()?;

    let coordinator = Arc::new(SyncCoordinator::open(&config)?);

    log::info!("Starting wallet sync daemon against {}", config.esplora_url);
    sync_ops::sync(coordinator, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await?;

    log::info!("Wallet sync daemon stopped");
    Ok(())
}
