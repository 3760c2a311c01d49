use super::models::{ListBlocksRequest, NodeStatusEnvelope};
use super::{BLOCKS_ENDPOINT, NODES_URL, STATUS_ENDPOINT};
use crate::blockchain::BlockRecord;
use crate::node::registry::{NetworkNodeAddress, NetworkNodeStatus};
use crate::utils::Hash;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("peer {0} is unreachable")]
    Unreachable(NetworkNodeAddress),

    #[error("peer {peer} answered with status {status}")]
    Status {
        peer: NetworkNodeAddress,
        status: StatusCode,
    },

    #[error("request to peer {peer} failed: {source}")]
    Request {
        peer: NetworkNodeAddress,
        #[source]
        source: reqwest::Error,
    },
}

/// How the sync loop talks to other nodes.
pub trait PeerClient: Send + Sync + 'static {
    fn node_status(
        &self,
        peer: &NetworkNodeAddress,
    ) -> impl Future<Output = Result<NetworkNodeStatus, PeerError>> + Send;

    /// Block records the peer holds after `from`.
    fn next_blocks(
        &self,
        peer: &NetworkNodeAddress,
        from: Hash,
    ) -> impl Future<Output = Result<Vec<BlockRecord>, PeerError>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpPeerClient { client })
    }
}

fn url(peer: &NetworkNodeAddress, endpoint: &str) -> String {
    format!("http://{}{}{}", peer, NODES_URL, endpoint)
}

fn request_error(peer: &NetworkNodeAddress, source: reqwest::Error) -> PeerError {
    if source.is_connect() {
        return PeerError::Unreachable(peer.clone());
    }
    match source.status() {
        Some(status) => PeerError::Status {
            peer: peer.clone(),
            status,
        },
        None => PeerError::Request {
            peer: peer.clone(),
            source,
        },
    }
}

impl PeerClient for HttpPeerClient {
    async fn node_status(&self, peer: &NetworkNodeAddress) -> Result<NetworkNodeStatus, PeerError> {
        debug!(%peer, "fetching node status");
        let envelope = self
            .client
            .get(url(peer, STATUS_ENDPOINT))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| request_error(peer, err))?
            .json::<NodeStatusEnvelope>()
            .await
            .map_err(|err| request_error(peer, err))?;
        Ok(envelope.status.into_status())
    }

    async fn next_blocks(
        &self,
        peer: &NetworkNodeAddress,
        from: Hash,
    ) -> Result<Vec<BlockRecord>, PeerError> {
        debug!(%peer, %from, "fetching blocks");
        self.client
            .post(url(peer, BLOCKS_ENDPOINT))
            .json(&ListBlocksRequest { from })
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| request_error(peer, err))?
            .json::<Vec<BlockRecord>>()
            .await
            .map_err(|err| request_error(peer, err))
    }
}
