use super::transaction::{Transaction, TransactionId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};
use tracing::debug;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("transaction {0} already in pool")]
    AlreadyInPool(TransactionId),

    #[error("pool is not accepting transactions right now")]
    Unavailable,

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Unconfirmed transactions keyed by id.
///
/// Every accepted transaction is also published on a bounded channel the
/// mining loop listens on. A full channel rejects the submission instead of
/// queueing it.
pub struct TxPool {
    pending: Mutex<HashMap<TransactionId, Transaction>>,
    notify: Sender<Transaction>,
}

impl TxPool {
    pub fn new(capacity: usize) -> (Self, Receiver<Transaction>) {
        let (notify, new_txs) = mpsc::channel(capacity.max(1));
        (
            TxPool {
                pending: Mutex::new(HashMap::new()),
                notify,
            },
            new_txs,
        )
    }

    pub fn add_tx(&self, tx: Transaction) -> Result<TransactionId, PoolError> {
        let id = tx.id()?;
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(PoolError::AlreadyInPool(id));
        }
        match self.notify.try_send(tx.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                return Err(PoolError::Unavailable)
            }
        }
        pending.insert(id, tx);
        debug!(tx = %id, pool = pending.len(), "transaction added to pool");
        Ok(id)
    }

    /// Pooled transactions, oldest first.
    pub fn get_txs(&self) -> Vec<(TransactionId, Transaction)> {
        let mut txs: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();
        txs.sort_by(|(a_id, a), (b_id, b)| a.time.cmp(&b.time).then_with(|| a_id.cmp(b_id)));
        txs
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.lock().contains_key(id)
    }

    pub fn remove_tx(&self, id: &TransactionId) -> Option<Transaction> {
        self.lock().remove(id)
    }

    /// Removes every listed transaction and returns how many were present.
    pub fn remove_txs<'a>(&self, ids: impl IntoIterator<Item = &'a TransactionId>) -> usize {
        let mut pending = self.lock();
        ids.into_iter()
            .filter(|id| pending.remove(*id).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TransactionId, Transaction>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
