use super::transaction::{Account, Transaction, TransactionId};
use crate::utils::{hash_json, Hash};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub parent: Hash,
    pub height: u64,
    pub nonce: u32,
    pub time: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(
        parent: Hash,
        height: u64,
        nonce: u32,
        time: u64,
        transactions: Vec<Transaction>,
    ) -> Block {
        Block {
            header: BlockHeader {
                parent,
                height,
                nonce,
                time,
            },
            transactions,
        }
    }

    /// Digest of the header and transactions together.
    pub fn hash(&self) -> Result<Hash, serde_json::Error> {
        hash_json(self)
    }

    pub fn tx_ids(&self) -> Result<Vec<TransactionId>, serde_json::Error> {
        self.transactions.iter().map(Transaction::id).collect()
    }
}

/// A block and its hash; one per line in the block log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash,
    pub block: Block,
}

impl BlockRecord {
    pub fn new(block: Block) -> Result<BlockRecord, serde_json::Error> {
        let hash = block.hash()?;
        Ok(BlockRecord { hash, block })
    }
}

/// A mining candidate: everything but the nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    pub parent: Hash,
    pub height: u64,
    pub time: u64,
    pub miner: Account,
    pub txs: Vec<Transaction>,
}

impl PendingBlock {
    pub fn new(
        parent: Hash,
        height: u64,
        time: u64,
        miner: Account,
        txs: Vec<Transaction>,
    ) -> PendingBlock {
        PendingBlock {
            parent,
            height,
            time,
            miner,
            txs,
        }
    }

    pub fn seal(&self, nonce: u32) -> Block {
        Block::new(self.parent, self.height, nonce, self.time, self.txs.clone())
    }
}
