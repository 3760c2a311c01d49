//! JSON bodies shared by the server handlers and the peer client.

use crate::blockchain::{Account, Reason, Transaction};
use crate::node::registry::{NetworkNode, NetworkNodeAddress, NetworkNodeStatus};
use crate::utils::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusEnvelope {
    pub status: NodeStatusResponse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusResponse {
    pub block_hash: Hash,
    pub block_height: u64,
    pub network_nodes: Vec<NetworkNodeResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkNodeResponse {
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub is_bootstrap: bool,
    pub is_active: bool,
}

impl NodeStatusResponse {
    pub fn new(
        block_hash: Hash,
        block_height: u64,
        nodes: HashMap<NetworkNodeAddress, NetworkNode>,
    ) -> Self {
        let mut network_nodes: Vec<_> = nodes
            .into_iter()
            .map(|(address, node)| NetworkNodeResponse {
                name: node.name,
                ip: address.ip,
                port: address.port,
                is_bootstrap: node.is_bootstrap,
                is_active: node.is_active,
            })
            .collect();
        network_nodes.sort_by(|a, b| (&a.ip, a.port).cmp(&(&b.ip, b.port)));
        NodeStatusResponse {
            block_hash,
            block_height,
            network_nodes,
        }
    }

    pub fn into_status(self) -> NetworkNodeStatus {
        let known_peers = self
            .network_nodes
            .into_iter()
            .map(|node| {
                (
                    NetworkNodeAddress::new(node.ip, node.port),
                    NetworkNode {
                        name: node.name,
                        is_bootstrap: node.is_bootstrap,
                        is_active: node.is_active,
                    },
                )
            })
            .collect();
        NetworkNodeStatus {
            hash: self.block_hash,
            height: self.block_height,
            known_peers,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListBlocksRequest {
    pub from: Hash,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddTransactionRequest {
    pub from: Account,
    pub to: Account,
    pub value: u64,
    #[serde(default)]
    pub reason: Reason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResponse {
    pub hash: Hash,
    #[serde(flatten)]
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub account: Account,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancesResponse {
    pub block_hash: Hash,
    pub block_height: u64,
    pub balances: Vec<BalanceResponse>,
}
