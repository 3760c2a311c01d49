use anyhow::Context;
use clap::Parser;
use rustchain::api::{run_server, AppState, HttpPeerClient};
use rustchain::blockchain::state::log_summary;
use rustchain::blockchain::{FileState, State, TxPool};
use rustchain::config::{Args, NodeConfig};
use rustchain::node::{NodeRegistry, SyncManager};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = NodeConfig::try_from(args).context("invalid configuration")?;

    let state = FileState::load(&config.genesis_path, &config.blocks_path)
        .context("failed to load ledger")?;
    log_summary(&state);
    let state: Arc<dyn State> = Arc::new(state);
    let registry = Arc::new(
        NodeRegistry::open(&config.nodes_path).context("failed to open node registry")?,
    );
    let (pool, new_txs) = TxPool::new(config.pool_capacity);
    let pool = Arc::new(pool);
    let client = Arc::new(HttpPeerClient::new(config.peer_timeout).context("failed to build peer client")?);

    let (manager, synced) = SyncManager::new(
        Arc::clone(&state),
        Arc::clone(&pool),
        Arc::clone(&registry),
        client,
        config.pow,
        config.miner.clone(),
        config.sync_settings(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (mine, sync) = Arc::new(manager).spawn(new_txs, synced, shutdown_rx);

    info!(
        address = %config.public_address,
        miner = %config.miner,
        "node started"
    );
    let served = run_server(
        AppState {
            state,
            pool,
            registry,
        },
        &config.bind_address,
    )
    .await;

    info!("shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("background loops already stopped");
    }
    for (name, handle) in [("mining", mine), ("sync", sync)] {
        if let Err(err) = handle.await {
            warn!(loop_name = name, error = %err, "background loop failed");
        }
    }

    served.context("http server failed")
}
