use super::block::{Block, PendingBlock};
use crate::utils::Hash;
use core::fmt;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

const PROGRESS_EVERY: u64 = 1_000_000;

#[derive(Debug, Error)]
pub enum MiningError {
    #[error("cannot mine block with empty transaction list")]
    EmptyBlock,

    #[error("mining task has been cancelled")]
    Cancelled,

    #[error("complexity {0} exceeds the 32-byte hash length")]
    InvalidComplexity(usize),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Cooperative stop flag shared between a mining worker and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Proof of work: a block is valid once its hash starts with `complexity`
/// zero bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    complexity: usize,
}

impl ProofOfWork {
    pub const MAX_COMPLEXITY: usize = 32;

    pub fn new(complexity: usize) -> Result<Self, MiningError> {
        if complexity > Self::MAX_COMPLEXITY {
            return Err(MiningError::InvalidComplexity(complexity));
        }
        Ok(ProofOfWork { complexity })
    }

    pub fn complexity(&self) -> usize {
        self.complexity
    }

    pub fn meets_target(&self, hash: &Hash) -> bool {
        hash.as_bytes()[..self.complexity].iter().all(|byte| *byte == 0)
    }

    /// Searches random nonces until the sealed block meets the target.
    ///
    /// `cancel` is checked before every attempt, so a cancelled search stops
    /// after at most one more hash. CPU bound: run it on a blocking thread.
    pub fn mine(&self, cancel: &CancelSignal, pending: &PendingBlock) -> Result<Block, MiningError> {
        if pending.txs.is_empty() {
            return Err(MiningError::EmptyBlock);
        }

        let mut rng = rand::thread_rng();
        let mut block = pending.seal(0);
        let mut attempts: u64 = 0;
        loop {
            if cancel.is_cancelled() {
                debug!(height = pending.height, attempts, "mining cancelled");
                return Err(MiningError::Cancelled);
            }

            block.header.nonce = rng.gen();
            let hash = block.hash()?;
            attempts += 1;
            if attempts % PROGRESS_EVERY == 0 {
                debug!(height = pending.height, attempts, "still mining");
            }

            if self.meets_target(&hash) {
                info!(
                    height = pending.height,
                    attempts,
                    nonce = block.header.nonce,
                    %hash,
                    miner = %pending.miner,
                    "found nonce"
                );
                return Ok(block);
            }
        }
    }
}

impl fmt::Display for ProofOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Complexity (leading zero bytes in hash) = {}",
            self.complexity
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Account, Reason, Transaction};

    fn pending(txs: usize) -> PendingBlock {
        let miner = Account::new("0x1111111111111111111111111111111111111111").unwrap();
        let txs = (0..txs)
            .map(|i| Transaction::new(miner.clone(), miner.clone(), 1, Reason::SelfReward, i as u64))
            .collect();
        PendingBlock::new(Hash::ZERO, 1, 1_700_000_000, miner, txs)
    }

    #[test]
    fn test_zero_complexity_succeeds_first_try() {
        let pow = ProofOfWork::new(0).unwrap();
        let block = pow.mine(&CancelSignal::new(), &pending(1)).unwrap();
        assert_eq!(block.header.height, 1);
        assert_eq!(block.header.parent, Hash::ZERO);
        assert_eq!(block.transactions.len(), 1);
    }

    #[test]
    fn test_found_block_meets_target() {
        let pow = ProofOfWork::new(1).unwrap();
        let block = pow.mine(&CancelSignal::new(), &pending(2)).unwrap();
        let hash = block.hash().unwrap();
        assert_eq!(hash.as_bytes()[0], 0);
        assert!(pow.meets_target(&hash));
    }

    #[test]
    fn test_cancelled_before_start() {
        let pow = ProofOfWork::new(0).unwrap();
        let cancel = CancelSignal::new();
        cancel.cancel();
        assert!(matches!(
            pow.mine(&cancel, &pending(1)),
            Err(MiningError::Cancelled)
        ));
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let pow = ProofOfWork::new(ProofOfWork::MAX_COMPLEXITY).unwrap();
        let cancel = CancelSignal::new();
        let worker_cancel = cancel.clone();
        let worker = std::thread::spawn(move || pow.mine(&worker_cancel, &pending(1)));
        std::thread::sleep(std::time::Duration::from_millis(20));
        cancel.cancel();
        assert!(matches!(worker.join().unwrap(), Err(MiningError::Cancelled)));
    }

    #[test]
    fn test_empty_candidate_rejected() {
        let pow = ProofOfWork::new(0).unwrap();
        assert!(matches!(
            pow.mine(&CancelSignal::new(), &pending(0)),
            Err(MiningError::EmptyBlock)
        ));
    }

    #[test]
    fn test_complexity_bounds() {
        assert!(ProofOfWork::new(32).is_ok());
        assert!(matches!(
            ProofOfWork::new(33),
            Err(MiningError::InvalidComplexity(33))
        ));
        assert!(ProofOfWork::new(0).unwrap().meets_target(&crate::utils::sha256(b"x")));
    }
}
