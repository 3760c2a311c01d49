use super::registry::{NetworkNode, NetworkNodeAddress, NetworkNodeStatus, RegistryError};
use super::SyncManager;
use crate::api::{PeerClient, PeerError};
use crate::blockchain::Block;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

/// What one sync cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_queried: usize,
    pub peers_discovered: usize,
    pub blocks_applied: usize,
    pub source: Option<NetworkNodeAddress>,
}

type StatusQuery = (NetworkNodeAddress, Result<NetworkNodeStatus, PeerError>);

/// Picks the peer to pull blocks from: strictly higher than `local_height`,
/// highest first, smallest address on ties.
pub fn select_sync_target(
    local_height: u64,
    heights: &HashMap<NetworkNodeAddress, u64>,
) -> Option<(NetworkNodeAddress, u64)> {
    heights
        .iter()
        .filter(|(_, height)| **height > local_height)
        .max_by(|(a, a_height), (b, b_height)| a_height.cmp(b_height).then_with(|| b.cmp(a)))
        .map(|(address, height)| (address.clone(), *height))
}

impl<C: PeerClient> SyncManager<C> {
    pub async fn run_sync(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            match self.sync_once().await {
                Ok(report) if report.blocks_applied > 0 => info!(
                    blocks = report.blocks_applied,
                    source = ?report.source,
                    height = self.state.latest_block_height(),
                    "synced blocks from peer"
                ),
                Ok(report) => debug!(
                    peers = report.peers_queried,
                    discovered = report.peers_discovered,
                    "sync cycle finished, nothing to pull"
                ),
                Err(err) => warn!(error = %err, "sync cycle failed"),
            }
        }
        info!("sync loop stopped");
    }

    /// One round: ask every known peer for its status, remember newly
    /// discovered peers, then pull blocks from the tallest peer if it is
    /// ahead of us.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let mut known = self.registry.list()?;
        if let Some(me) = &self.settings.self_address {
            known.remove(me);
        }
        let mut report = SyncReport::default();
        if known.is_empty() {
            debug!("no peers to sync with");
            return Ok(report);
        }

        let (heights, discovered) = self.query_peers(&known).await;
        report.peers_queried = heights.len();
        report.peers_discovered = discovered.len();
        if !discovered.is_empty() {
            match self.registry.merge(discovered) {
                Ok(added) => debug!(added, "registered discovered peers"),
                Err(err) => warn!(error = %err, "discovered peers could not be registered"),
            }
        }

        let local_height = self.state.latest_block_height();
        let Some((peer, height)) = select_sync_target(local_height, &heights) else {
            return Ok(report);
        };
        info!(%peer, height, local_height, "peer is ahead, fetching blocks");

        let records = self
            .client
            .next_blocks(&peer, self.state.latest_block_hash())
            .await?;
        let blocks: Vec<Block> = records.into_iter().map(|record| record.block).collect();
        // Confirmed transactions must leave the pool before their block lands.
        let mut unconfirmed = 0;
        for block in &blocks {
            match block.tx_ids() {
                Ok(ids) => unconfirmed += self.pool.remove_txs(ids.iter()),
                Err(err) => warn!(%peer, error = %err, "peer block could not be hashed"),
            }
        }
        if unconfirmed > 0 {
            debug!(%peer, removed = unconfirmed, "pooled transactions confirmed by peer blocks");
        }
        let applied = match self.state.add_blocks(&blocks) {
            Ok(applied) => applied,
            Err(err) => {
                warn!(%peer, applied = err.applied, error = %err.source, "stopped applying peer blocks");
                err.applied
            }
        };
        report.blocks_applied = applied;
        report.source = Some(peer);

        for block in blocks.into_iter().take(applied) {
            if self.synced_blocks.send(block).await.is_err() {
                warn!("mining loop is gone, synced blocks not forwarded");
                break;
            }
        }
        Ok(report)
    }

    /// Queries `known` peers and, recursively, every active peer they
    /// report that we have not seen. Returns the height of each queried peer
    /// (0 when the query failed) and the peers we did not know before.
    async fn query_peers(
        &self,
        known: &HashMap<NetworkNodeAddress, NetworkNode>,
    ) -> (
        HashMap<NetworkNodeAddress, u64>,
        HashMap<NetworkNodeAddress, NetworkNode>,
    ) {
        let mut heights = HashMap::new();
        let mut discovered = HashMap::new();
        let mut queried = HashSet::new();
        let mut tasks = JoinSet::new();
        for peer in known.keys() {
            self.spawn_query(&mut tasks, &mut queried, peer.clone());
        }

        while let Some(joined) = tasks.join_next().await {
            let (peer, result) = match joined {
                Ok(query) => query,
                Err(err) => {
                    warn!(error = %err, "peer status task failed");
                    continue;
                }
            };
            match result {
                Ok(status) => {
                    debug!(%peer, height = status.height, hash = %status.hash, "peer status");
                    heights.insert(peer, status.height);
                    for (address, node) in status.known_peers {
                        if self.is_self(&address) || known.contains_key(&address) {
                            continue;
                        }
                        // Any report of the peer being active gets it queried,
                        // whatever order the answers arrive in.
                        let active = node.is_active;
                        if active {
                            self.spawn_query(&mut tasks, &mut queried, address.clone());
                        }
                        discovered
                            .entry(address)
                            .and_modify(|seen: &mut NetworkNode| seen.is_active |= active)
                            .or_insert(node);
                    }
                }
                Err(err) => {
                    warn!(%peer, error = %err, "peer status query failed");
                    heights.insert(peer, 0);
                }
            }
        }
        (heights, discovered)
    }

    fn spawn_query(
        &self,
        tasks: &mut JoinSet<StatusQuery>,
        queried: &mut HashSet<NetworkNodeAddress>,
        peer: NetworkNodeAddress,
    ) {
        if !queried.insert(peer.clone()) {
            return;
        }
        let client = Arc::clone(&self.client);
        tasks.spawn(async move {
            let result = client.node_status(&peer).await;
            (peer, result)
        });
    }
}
