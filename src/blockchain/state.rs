//! Ledger state: account balances, the chain tip and the rules for applying
//! transactions and blocks on top of them.
//!
//! [`State`] is the interface the rest of the node talks to. [`Ledger`] is its
//! only implementation, generic over where committed blocks go: a file for
//! the real node ([`super::chain::FileState`]) or a vector for tests
//! ([`MemoryState`]).

use super::block::{Block, BlockRecord};
use super::transaction::{Account, AccountError, Transaction};
use crate::utils::{unix_now, Hash};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: {account} needs {needed}, has {available}")]
    InsufficientBalance {
        account: Account,
        needed: u64,
        available: u64,
    },

    #[error("self-reward must credit its sender, got {from} -> {to}")]
    SelfRewardMismatch { from: Account, to: Account },

    #[error("balance of {0} would overflow")]
    BalanceOverflow(Account),

    #[error("latest block height {latest} doesn't match with next block height {got}")]
    NextBlockHeight { latest: u64, got: u64 },

    #[error("latest block hash {latest} doesn't match with next block parent {got}")]
    NextBlockHash { latest: Hash, got: Hash },

    #[error("no pending transactions to persist")]
    NothingToPersist,

    #[error("block log line {line} is malformed: {source}")]
    CorruptLog {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// The block does not extend the current tip.
    pub fn is_linkage(&self) -> bool {
        matches!(
            self,
            LedgerError::NextBlockHeight { .. } | LedgerError::NextBlockHash { .. }
        )
    }

    /// The transaction itself is invalid against current balances.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InsufficientBalance { .. }
                | LedgerError::SelfRewardMismatch { .. }
                | LedgerError::BalanceOverflow(_)
        ) || self.is_linkage()
    }
}

/// `add_blocks` stopped early. The first `applied` blocks stay committed.
#[derive(Debug, Error)]
#[error("block batch stopped after {applied} committed blocks: {source}")]
pub struct BatchError {
    pub applied: usize,
    #[source]
    pub source: LedgerError,
}

/// Balances plus tip. Cheap enough to clone per block validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    balances: HashMap<Account, u64>,
    latest_hash: Hash,
    latest_height: u64,
}

impl LedgerSnapshot {
    pub fn new(balances: HashMap<Account, u64>) -> Self {
        LedgerSnapshot {
            balances,
            latest_hash: Hash::ZERO,
            latest_height: 0,
        }
    }

    pub fn balances(&self) -> &HashMap<Account, u64> {
        &self.balances
    }

    pub fn balance(&self, account: &Account) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn latest_hash(&self) -> Hash {
        self.latest_hash
    }

    pub fn latest_height(&self) -> u64 {
        self.latest_height
    }

    /// Applies one transaction. On error nothing changes.
    pub fn apply_tx(&mut self, tx: &Transaction) -> Result<(), LedgerError> {
        if tx.is_reward() {
            if tx.from != tx.to {
                return Err(LedgerError::SelfRewardMismatch {
                    from: tx.from.clone(),
                    to: tx.to.clone(),
                });
            }
            return self.credit(&tx.to, tx.value);
        }

        let available = self.balance(&tx.from);
        if tx.value > available {
            return Err(LedgerError::InsufficientBalance {
                account: tx.from.clone(),
                needed: tx.value,
                available,
            });
        }
        if tx.from == tx.to {
            return Ok(());
        }

        let credited = self
            .balance(&tx.to)
            .checked_add(tx.value)
            .ok_or_else(|| LedgerError::BalanceOverflow(tx.to.clone()))?;
        self.balances.insert(tx.from.clone(), available - tx.value);
        self.balances.insert(tx.to.clone(), credited);
        Ok(())
    }

    /// Applies transactions in order, stopping at the first failure. Not atomic:
    /// callers run this on a copy.
    pub fn apply_txs(&mut self, txs: &[Transaction]) -> Result<(), LedgerError> {
        txs.iter().try_for_each(|tx| self.apply_tx(tx))
    }

    /// Checks `block` extends the tip, then applies its transactions. The tip
    /// itself only moves in [`LedgerSnapshot::advance`].
    pub fn apply_block(&mut self, block: &Block) -> Result<(), LedgerError> {
        debug!(
            next = block.header.height,
            latest = self.latest_height,
            "checking block height"
        );
        if block.header.height != self.latest_height + 1 {
            return Err(LedgerError::NextBlockHeight {
                latest: self.latest_height,
                got: block.header.height,
            });
        }
        if block.header.parent != self.latest_hash {
            return Err(LedgerError::NextBlockHash {
                latest: self.latest_hash,
                got: block.header.parent,
            });
        }
        self.apply_txs(&block.transactions)
    }

    pub(crate) fn advance(&mut self, hash: Hash, height: u64) {
        self.latest_hash = hash;
        self.latest_height = height;
    }

    fn credit(&mut self, account: &Account, value: u64) -> Result<(), LedgerError> {
        let credited = self
            .balance(account)
            .checked_add(value)
            .ok_or_else(|| LedgerError::BalanceOverflow(account.clone()))?;
        self.balances.insert(account.clone(), credited);
        Ok(())
    }
}

/// Append-only storage of committed blocks.
pub trait BlockLog: Send {
    fn append(&mut self, record: &BlockRecord) -> Result<(), LedgerError>;

    /// Every record after the one hashed `from`, in commit order. The zero
    /// hash stands for genesis and yields the whole log.
    fn records_after(&mut self, from: &Hash) -> Result<Vec<BlockRecord>, LedgerError>;
}

pub trait State: Send + Sync {
    /// Validates `tx` and buffers it for [`State::persist`]. Balances reflect
    /// buffered transactions immediately.
    fn add(&self, tx: Transaction) -> Result<(), LedgerError>;

    /// Commits a block extending the tip and returns its hash.
    fn add_block(&self, block: &Block) -> Result<Hash, LedgerError>;

    /// Commits blocks in order. Returns how many were committed.
    fn add_blocks(&self, blocks: &[Block]) -> Result<usize, BatchError> {
        for (applied, block) in blocks.iter().enumerate() {
            self.add_block(block)
                .map_err(|source| BatchError { applied, source })?;
        }
        Ok(blocks.len())
    }

    /// Seals the buffered transactions into a block without proof of work.
    fn persist(&self) -> Result<Hash, LedgerError>;

    fn next_blocks_from_hash(&self, from: &Hash) -> Result<Vec<BlockRecord>, LedgerError>;

    fn snapshot(&self) -> LedgerSnapshot;

    fn balances(&self) -> HashMap<Account, u64> {
        self.snapshot().balances
    }

    fn latest_block_hash(&self) -> Hash {
        self.snapshot().latest_hash
    }

    fn latest_block_height(&self) -> u64 {
        self.snapshot().latest_height
    }
}

pub struct Ledger<L> {
    snapshot: RwLock<LedgerSnapshot>,
    pending: Mutex<Vec<Transaction>>,
    log: Mutex<L>,
}

impl<L: BlockLog> Ledger<L> {
    pub fn from_parts(snapshot: LedgerSnapshot, log: L) -> Self {
        Ledger {
            snapshot: RwLock::new(snapshot),
            pending: Mutex::new(Vec::new()),
            log: Mutex::new(log),
        }
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

// Lock order: log, then snapshot, then pending.
impl<L: BlockLog> State for Ledger<L> {
    fn add(&self, tx: Transaction) -> Result<(), LedgerError> {
        let mut snapshot = write(&self.snapshot);
        snapshot.apply_tx(&tx)?;
        lock(&self.pending).push(tx);
        Ok(())
    }

    fn add_block(&self, block: &Block) -> Result<Hash, LedgerError> {
        let base = self.snapshot();
        let mut candidate = base.clone();
        candidate.apply_block(block)?;
        let record = BlockRecord::new(block.clone())?;

        let mut log = lock(&self.log);
        let mut live = write(&self.snapshot);
        if *live != base {
            // Someone committed while we validated; redo it against the new state.
            candidate = live.clone();
            candidate.apply_block(block)?;
        }
        log.append(&record)?;
        candidate.advance(record.hash, block.header.height);
        *live = candidate;
        debug!(hash = %record.hash, height = block.header.height, "block committed");
        Ok(record.hash)
    }

    fn persist(&self) -> Result<Hash, LedgerError> {
        let mut log = lock(&self.log);
        let mut live = write(&self.snapshot);
        let mut pending = lock(&self.pending);
        if pending.is_empty() {
            return Err(LedgerError::NothingToPersist);
        }

        let height = live.latest_height + 1;
        let block = Block::new(live.latest_hash, height, 0, unix_now(), pending.clone());
        let record = BlockRecord::new(block)?;
        log.append(&record)?;
        live.advance(record.hash, height);
        pending.clear();
        Ok(record.hash)
    }

    fn next_blocks_from_hash(&self, from: &Hash) -> Result<Vec<BlockRecord>, LedgerError> {
        lock(&self.log).records_after(from)
    }

    fn snapshot(&self) -> LedgerSnapshot {
        read(&self.snapshot).clone()
    }

    fn latest_block_hash(&self) -> Hash {
        read(&self.snapshot).latest_hash
    }

    fn latest_block_height(&self) -> u64 {
        read(&self.snapshot).latest_height
    }
}

#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Vec<BlockRecord>,
}

impl BlockLog for MemoryLog {
    fn append(&mut self, record: &BlockRecord) -> Result<(), LedgerError> {
        self.records.push(record.clone());
        Ok(())
    }

    fn records_after(&mut self, from: &Hash) -> Result<Vec<BlockRecord>, LedgerError> {
        if from.is_zero() {
            return Ok(self.records.clone());
        }
        Ok(self
            .records
            .iter()
            .skip_while(|record| record.hash != *from)
            .skip(1)
            .cloned()
            .collect())
    }
}

/// Ledger that keeps its blocks in memory. Used where no file is wanted.
pub type MemoryState = Ledger<MemoryLog>;

impl Ledger<MemoryLog> {
    pub fn new(balances: HashMap<Account, u64>) -> Self {
        Ledger::from_parts(LedgerSnapshot::new(balances), MemoryLog::default())
    }
}

pub fn log_summary(state: &dyn State) {
    let snapshot = state.snapshot();
    info!(
        hash = %snapshot.latest_hash(),
        height = snapshot.latest_height(),
        accounts = snapshot.balances().len(),
        "ledger state"
    );
    let mut balances: Vec<_> = snapshot.balances().iter().collect();
    balances.sort();
    for (account, balance) in balances {
        info!(%account, balance, "balance");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
