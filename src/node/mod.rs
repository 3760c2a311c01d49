//! Background side of the node: the mining loop and the peer sync loop.

pub mod mining;
pub mod registry;
pub mod sync;

pub use registry::{NetworkNode, NetworkNodeAddress, NetworkNodeStatus, NodeRegistry, RegistryError};
pub use mining::{MiningCounts, MiningStats};
pub use sync::{select_sync_target, SyncError, SyncReport};

use crate::api::PeerClient;
use crate::blockchain::{Account, Block, ProofOfWork, State, Transaction, TxPool};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

const SYNCED_BLOCKS_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync_interval: Duration,
    pub mine_interval: Duration,
    /// The address peers know this node by. Never queried or registered.
    pub self_address: Option<NetworkNodeAddress>,
}

pub struct SyncManager<C: PeerClient> {
    state: Arc<dyn State>,
    pool: Arc<TxPool>,
    registry: Arc<NodeRegistry>,
    client: Arc<C>,
    pow: ProofOfWork,
    miner: Account,
    settings: SyncSettings,
    synced_blocks: mpsc::Sender<Block>,
    stats: MiningStats,
}

impl<C: PeerClient> SyncManager<C> {
    /// Returns the manager and the receiving end of the synced-block channel,
    /// which belongs to the mining loop.
    pub fn new(
        state: Arc<dyn State>,
        pool: Arc<TxPool>,
        registry: Arc<NodeRegistry>,
        client: Arc<C>,
        pow: ProofOfWork,
        miner: Account,
        settings: SyncSettings,
    ) -> (Self, mpsc::Receiver<Block>) {
        let (synced_blocks, synced_rx) = mpsc::channel(SYNCED_BLOCKS_CAPACITY);
        (
            SyncManager {
                state,
                pool,
                registry,
                client,
                pow,
                miner,
                settings,
                synced_blocks,
                stats: MiningStats::default(),
            },
            synced_rx,
        )
    }

    pub fn mining_counts(&self) -> MiningCounts {
        self.stats.counts()
    }

    fn is_self(&self, address: &NetworkNodeAddress) -> bool {
        self.settings.self_address.as_ref() == Some(address)
    }

    /// Starts the mining and sync loops. Both stop once `shutdown` flips.
    pub fn spawn(
        self: Arc<Self>,
        new_txs: mpsc::Receiver<Transaction>,
        synced: mpsc::Receiver<Block>,
        shutdown: watch::Receiver<bool>,
    ) -> (JoinHandle<()>, JoinHandle<()>) {
        let miner = Arc::clone(&self);
        let mine_shutdown = shutdown.clone();
        let mine = tokio::spawn(async move { miner.run_mine(new_txs, synced, mine_shutdown).await });
        let sync = tokio::spawn(async move { self.run_sync(shutdown).await });
        (mine, sync)
    }
}
