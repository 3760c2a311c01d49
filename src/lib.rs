//! A small proof-of-work ledger node: account balances rebuilt from an
//! append-only block log, a transaction pool, a cancellable miner and a
//! peer sync loop, served over HTTP.

pub mod api;
pub mod blockchain;
pub mod config;
pub mod node;
pub mod utils;
