//! Local HTTP API
//!
//! Read-mostly surface over the sync engine, consensus aggregator, wallet
//! session and vote protocol:
//! - Poll endpoints (tally, consensus, sync status, votes)
//! - Wallet endpoints (session, connect, disconnect)
//! - Health check

pub mod polls;
pub mod wallet;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde::Serialize;
use std::sync::Arc;

use crate::consensus::ConsensusAggregator;
use crate::oracle::HealthProbe;
use crate::sync::SyncEngine;
use crate::vote::VoteSubmitter;
use crate::wallet::WalletSessionManager;

#[derive(Clone)]
pub struct ApiState {
    pub sync: Arc<SyncEngine>,
    pub consensus: Arc<ConsensusAggregator>,
    pub wallet: Arc<WalletSessionManager>,
    pub votes: Arc<VoteSubmitter>,
    /// Upstream backend probe; None when tallies come from elsewhere
    pub backend: Option<HealthProbe>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend_reachable: Option<bool>,
    pub watched_polls: Vec<String>,
    pub timestamp: String,
}

/// Health check. Reports degraded when the backend probe fails.
pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let backend_reachable = match &state.backend {
        Some(probe) => Some(probe.check().await),
        None => None,
    };

    let status = match backend_reachable {
        Some(false) => "degraded",
        _ => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        backend_reachable,
        watched_polls: state.sync.watched_polls(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Create the sentinel API router
pub fn create_router(state: ApiState) -> Router {
    Router::new()
        // Polls
        .route("/polls", get(polls::list_polls))
        .route("/polls/{poll_id}/tally", get(polls::get_tally))
        .route("/polls/{poll_id}/consensus", get(polls::get_consensus))
        .route("/polls/{poll_id}/sync", get(polls::get_sync_status))
        .route("/polls/{poll_id}/vote", post(polls::submit_vote))
        .route("/polls/{poll_id}/my-vote", get(polls::get_my_vote))
        // Wallet
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/connect", post(wallet::connect_wallet))
        .route("/wallet/disconnect", post(wallet::disconnect_wallet))
        // Health
        .route("/health", get(health))
        .with_state(state)
}
