use super::SyncManager;
use crate::api::PeerClient;
use crate::blockchain::{
    Block, CancelSignal, MiningError, PendingBlock, Transaction, TransactionId,
};
use crate::utils::unix_now;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type MiningOutcome = Result<Result<Block, MiningError>, JoinError>;

/// Running totals of mining attempts by how they ended.
#[derive(Debug, Default)]
pub struct MiningStats {
    started: AtomicU64,
    committed: AtomicU64,
    cancelled: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MiningCounts {
    pub started: u64,
    pub committed: u64,
    pub cancelled: u64,
    /// Attempts that found a block the ledger refused, or failed outright.
    pub discarded: u64,
}

impl MiningStats {
    pub fn counts(&self) -> MiningCounts {
        MiningCounts {
            started: self.started.load(Ordering::SeqCst),
            committed: self.committed.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }

    fn record(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// The one proof-of-work search in flight.
pub(crate) struct MiningAttempt {
    pub(crate) height: u64,
    pub(crate) txs: HashSet<TransactionId>,
    pub(crate) cancel: CancelSignal,
    pub(crate) cancelled: bool,
    pub(crate) handle: JoinHandle<Result<Block, MiningError>>,
}

impl MiningAttempt {
    fn cancel(&mut self) {
        if !self.cancelled {
            self.cancel.cancel();
            self.cancelled = true;
        }
    }
}

// Resolves when the attempt's worker returns; never resolves without one.
async fn wait_for(attempt: &mut Option<MiningAttempt>) -> MiningOutcome {
    match attempt {
        Some(attempt) => (&mut attempt.handle).await,
        None => std::future::pending().await,
    }
}

impl<C: PeerClient> SyncManager<C> {
    pub async fn run_mine(
        &self,
        mut new_txs: mpsc::Receiver<Transaction>,
        mut synced: mpsc::Receiver<Block>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = interval(self.settings.mine_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempt: Option<MiningAttempt> = None;
        let mut txs_open = true;
        let mut synced_open = true;

        info!(miner = %self.miner, "{}", self.pow);
        loop {
            tokio::select! {
                biased;

                _ = shutdown.changed() => break,
                block = synced.recv(), if synced_open => match block {
                    Some(block) => self.resolve_conflicts(&block, attempt.as_mut()),
                    None => synced_open = false,
                },
                outcome = wait_for(&mut attempt) => {
                    if let Some(finished) = attempt.take() {
                        self.finish_attempt(finished, outcome);
                    }
                }
                tx = new_txs.recv(), if txs_open => match tx {
                    Some(_) if attempt.is_none() => attempt = self.start_attempt(),
                    Some(_) => {}
                    None => txs_open = false,
                },
                _ = ticker.tick() => {
                    if attempt.is_none() {
                        attempt = self.start_attempt();
                    }
                }
            }
        }

        if let Some(mut attempt) = attempt {
            attempt.cancel();
            if let Err(err) = attempt.handle.await {
                error!(error = %err, "mining worker failed during shutdown");
            }
        }
        info!("mining loop stopped");
    }

    /// Builds a candidate from pooled transactions that still apply and
    /// starts mining it on a blocking thread. Pooled transactions that no
    /// longer apply are evicted.
    pub(crate) fn start_attempt(&self) -> Option<MiningAttempt> {
        // Tip before pool. Sync drops confirmed transactions from the pool
        // before committing their block, so a candidate holding one sits on
        // the old tip and fails linkage.
        let mut snapshot = self.state.snapshot();
        let pooled = self.pool.get_txs();
        if pooled.is_empty() {
            return None;
        }

        let mut ids = HashSet::new();
        let mut txs = Vec::new();
        for (id, tx) in pooled {
            match snapshot.apply_tx(&tx) {
                Ok(()) => {
                    ids.insert(id);
                    txs.push(tx);
                }
                Err(err) => {
                    warn!(tx = %id, error = %err, "evicting transaction that no longer applies");
                    self.pool.remove_tx(&id);
                }
            }
        }
        if txs.is_empty() {
            return None;
        }

        let height = snapshot.latest_height() + 1;
        let pending = PendingBlock::new(
            snapshot.latest_hash(),
            height,
            unix_now(),
            self.miner.clone(),
            txs,
        );
        let cancel = CancelSignal::new();
        let worker_cancel = cancel.clone();
        let pow = self.pow;
        info!(height, txs = ids.len(), "mining started");
        MiningStats::record(&self.stats.started);
        let handle = tokio::task::spawn_blocking(move || pow.mine(&worker_cancel, &pending));

        Some(MiningAttempt {
            height,
            txs: ids,
            cancel,
            cancelled: false,
            handle,
        })
    }

    pub(crate) fn finish_attempt(&self, attempt: MiningAttempt, outcome: MiningOutcome) {
        let height = attempt.height;
        let stats = &self.stats;
        match outcome {
            Ok(Ok(_)) if attempt.cancelled => {
                debug!(height, "discarding block of a cancelled attempt");
                MiningStats::record(&stats.cancelled);
            }
            Ok(Ok(block)) => match self.state.add_block(&block) {
                Ok(hash) => {
                    let removed = self.pool.remove_txs(attempt.txs.iter());
                    info!(%hash, height, txs = removed, "mined block committed");
                    MiningStats::record(&stats.committed);
                }
                Err(err) if err.is_linkage() => {
                    info!(height, error = %err, "tip moved while mining, block discarded");
                    MiningStats::record(&stats.discarded);
                }
                Err(err) => {
                    warn!(height, error = %err, "mined block rejected by the ledger");
                    MiningStats::record(&stats.discarded);
                }
            },
            Ok(Err(MiningError::Cancelled)) => {
                debug!(height, "mining attempt cancelled");
                MiningStats::record(&stats.cancelled);
            }
            Ok(Err(err)) => {
                warn!(height, error = %err, "mining failed");
                MiningStats::record(&stats.discarded);
            }
            Err(err) => {
                error!(height, error = %err, "mining worker failed");
                MiningStats::record(&stats.discarded);
            }
        }
    }

    /// Drops transactions confirmed by a synced block from the pool and
    /// cancels the in-flight attempt when the block makes it obsolete.
    pub(crate) fn resolve_conflicts(&self, block: &Block, attempt: Option<&mut MiningAttempt>) {
        let ids = match block.tx_ids() {
            Ok(ids) => ids,
            Err(err) => {
                warn!(height = block.header.height, error = %err, "synced block could not be hashed");
                return;
            }
        };
        let removed = self.pool.remove_txs(ids.iter());
        if removed > 0 {
            debug!(height = block.header.height, removed, "confirmed transactions left the pool");
        }

        let Some(attempt) = attempt else {
            return;
        };
        let overlaps = ids.iter().any(|id| attempt.txs.contains(id));
        // A synced block at or above the candidate height means the candidate
        // can no longer link to the tip.
        let stale = block.header.height >= attempt.height;
        if (overlaps || stale) && !attempt.cancelled {
            info!(
                height = attempt.height,
                synced_height = block.header.height,
                overlaps,
                "cancelling mining attempt"
            );
            attempt.cancel();
        }
    }
}
