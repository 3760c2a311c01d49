pub mod client;
pub mod models;
pub mod server;

pub use client::{HttpPeerClient, PeerClient, PeerError};
pub use server::{configure_api_routes, run_server, ApiError, AppState};

pub const NODES_URL: &str = "/api/nodes";
pub const STATUS_ENDPOINT: &str = "/status";
pub const BLOCKS_ENDPOINT: &str = "/blocks";
