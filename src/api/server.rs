use super::models::{
    AddTransactionRequest, BalanceResponse, BalancesResponse, ListBlocksRequest,
    NodeStatusEnvelope, NodeStatusResponse, TransactionResponse,
};
use super::{BLOCKS_ENDPOINT, NODES_URL, STATUS_ENDPOINT};
use crate::blockchain::{LedgerError, PoolError, State, Transaction, TxPool};
use crate::node::registry::NodeRegistry;
use crate::utils::unix_now;
use actix_web::http::StatusCode;
use actix_web::{middleware, web, App, HttpResponse, HttpServer, Responder, ResponseError};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Shared handles every handler reads from.
#[derive(Clone)]
pub struct AppState {
    pub state: Arc<dyn State>,
    pub pool: Arc<TxPool>,
    pub registry: Arc<NodeRegistry>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        HttpResponse::build(status).json(json!({
            "error": {
                "code": status.as_u16(),
                "status": status.canonical_reason().unwrap_or_default(),
                "message": self.to_string(),
            }
        }))
    }
}

impl From<PoolError> for ApiError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::AlreadyInPool(_) => ApiError::Conflict(err.to_string()),
            PoolError::Unavailable => ApiError::Unavailable("transaction cannot be added".into()),
            PoolError::Serialization(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        if err.is_validation() {
            ApiError::BadRequest(err.to_string())
        } else {
            error!(error = %err, "ledger failure");
            ApiError::Internal("ledger unavailable".into())
        }
    }
}

pub async fn healthz() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

// GET /api/nodes/status: this node's tip and the peers it knows
pub async fn node_status(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let nodes = data.registry.list().map_err(|err| {
        error!(error = %err, "nodes could not be listed");
        ApiError::Internal("nodes could not be found".into())
    })?;
    let snapshot = data.state.snapshot();
    let status = NodeStatusResponse::new(snapshot.latest_hash(), snapshot.latest_height(), nodes);
    Ok(HttpResponse::Ok().json(NodeStatusEnvelope { status }))
}

// POST /api/nodes/blocks: records committed after `from`
pub async fn node_blocks(
    data: web::Data<AppState>,
    req: web::Json<ListBlocksRequest>,
) -> Result<HttpResponse, ApiError> {
    debug!(from = %req.from, "collecting blocks for peer");
    let records = data.state.next_blocks_from_hash(&req.from)?;
    Ok(HttpResponse::Ok().json(records))
}

// PUT /api/transactions: submit a transaction to the pool
pub async fn add_transaction(
    data: web::Data<AppState>,
    req: web::Json<AddTransactionRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    if req.value == 0 {
        return Err(ApiError::BadRequest("value must be at least 1".into()));
    }
    let tx = Transaction::new(req.from, req.to, req.value, req.reason, unix_now());

    // Reject early what could never be mined on top of the current balances.
    data.state.snapshot().apply_tx(&tx)?;

    let hash = data.pool.add_tx(tx.clone())?;
    info!(tx = %hash, from = %tx.from, to = %tx.to, value = tx.value, "transaction accepted");
    Ok(HttpResponse::Created().json(json!({
        "transaction": TransactionResponse { hash, transaction: tx }
    })))
}

// GET /api/transactions/pending
pub async fn pending_transactions(data: web::Data<AppState>) -> impl Responder {
    let transactions: Vec<_> = data
        .pool
        .get_txs()
        .into_iter()
        .map(|(hash, transaction)| TransactionResponse { hash, transaction })
        .collect();
    HttpResponse::Ok().json(json!({ "transactions": transactions }))
}

// GET /api/balances
pub async fn balances(data: web::Data<AppState>) -> impl Responder {
    let snapshot = data.state.snapshot();
    let mut balances: Vec<_> = snapshot
        .balances()
        .iter()
        .map(|(account, value)| BalanceResponse {
            account: account.clone(),
            value: *value,
        })
        .collect();
    balances.sort_by(|a, b| a.account.cmp(&b.account));
    HttpResponse::Ok().json(BalancesResponse {
        block_hash: snapshot.latest_hash(),
        block_height: snapshot.latest_height(),
        balances,
    })
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

pub fn configure_api_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/api/healthz", web::get().to(healthz))
        .route(
            &format!("{NODES_URL}{STATUS_ENDPOINT}"),
            web::get().to(node_status),
        )
        .route(
            &format!("{NODES_URL}{BLOCKS_ENDPOINT}"),
            web::post().to(node_blocks),
        )
        .route("/api/transactions", web::put().to(add_transaction))
        .route(
            "/api/transactions/pending",
            web::get().to(pending_transactions),
        )
        .route("/api/balances", web::get().to(balances));
}

// Serve until the process is interrupted
pub async fn run_server(app_state: AppState, address: &str) -> std::io::Result<()> {
    let data = web::Data::new(app_state);
    info!(%address, "starting node http server");

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap(middleware::Logger::default())
            .configure(configure_api_routes)
    })
    .bind(address)?
    .run()
    .await
}
