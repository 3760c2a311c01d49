pub mod block;
pub mod chain;
pub mod consensus;
pub mod mempool;
pub mod state;
pub mod transaction;

pub use block::{Block, BlockHeader, BlockRecord, PendingBlock};
pub use chain::{FileLog, FileState, Genesis};
pub use consensus::{CancelSignal, MiningError, ProofOfWork};
pub use mempool::{PoolError, TxPool};
pub use state::{BatchError, Ledger, LedgerError, LedgerSnapshot, MemoryState, State};
pub use transaction::{Account, AccountError, Reason, Transaction, TransactionId};
