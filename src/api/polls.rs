//! Poll endpoints
//!
//!   GET  /polls                     -> sync status of every watched poll
//!   GET  /polls/{poll_id}/tally     -> latest tally snapshot
//!   GET  /polls/{poll_id}/consensus -> consensus for the current tally version
//!   GET  /polls/{poll_id}/sync      -> sync loop status
//!   POST /polls/{poll_id}/vote      -> sign and submit a vote
//!   GET  /polls/{poll_id}/my-vote   -> connected wallet's vote

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{ApiError, ApiState, api_error};
use crate::consensus::ConsensusView;
use crate::models::TallySnapshot;
use crate::sync::SyncStatus;
use crate::vote::{SubmissionError, VoteOutcome};

#[derive(Debug, Deserialize)]
pub struct VoteBody {
    pub option: String,
}

#[derive(Debug, Serialize)]
pub struct MyVoteResponse {
    pub poll_id: String,
    pub option: Option<String>,
}

fn snapshot_or_404(state: &ApiState, poll_id: &str) -> Result<Arc<TallySnapshot>, ApiError> {
    state
        .sync
        .snapshot(poll_id)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Poll {} is not monitored", poll_id)))
}

pub async fn list_polls(State(state): State<ApiState>) -> Json<Vec<SyncStatus>> {
    let statuses = state
        .sync
        .watched_polls()
        .iter()
        .filter_map(|poll_id| state.sync.status(poll_id))
        .collect();
    Json(statuses)
}

pub async fn get_tally(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
) -> Result<Json<TallySnapshot>, ApiError> {
    let snapshot = snapshot_or_404(&state, &poll_id)?;
    Ok(Json(snapshot.as_ref().clone()))
}

pub async fn get_consensus(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
) -> Result<Json<ConsensusView>, ApiError> {
    let snapshot = snapshot_or_404(&state, &poll_id)?;
    Ok(Json(state.consensus.consensus(&poll_id, snapshot.version).await))
}

pub async fn get_sync_status(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
) -> Result<Json<SyncStatus>, ApiError> {
    snapshot_or_404(&state, &poll_id)?;
    state.sync.status(&poll_id).map(Json).ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Poll {} has not been fetched yet", poll_id),
        )
    })
}

pub async fn submit_vote(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
    Json(body): Json<VoteBody>,
) -> Result<Json<VoteOutcome>, ApiError> {
    snapshot_or_404(&state, &poll_id)?;
    let poll = state.sync.poll_record(&poll_id).ok_or_else(|| {
        api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Poll {} metadata not loaded yet", poll_id),
        )
    })?;

    info!(poll_id = %poll_id, "Vote requested");

    state
        .votes
        .submit(&poll, &body.option)
        .await
        .map(Json)
        .map_err(|e| {
            warn!(poll_id = %poll_id, "Vote not accepted: {}", e);
            api_error(submission_status(&e), e.to_string())
        })
}

pub async fn get_my_vote(
    State(state): State<ApiState>,
    Path(poll_id): Path<String>,
) -> Json<MyVoteResponse> {
    let option = state.votes.my_vote(&poll_id).await;
    Json(MyVoteResponse { poll_id, option })
}

fn submission_status(error: &SubmissionError) -> StatusCode {
    match error {
        SubmissionError::WalletNotConnected => StatusCode::UNAUTHORIZED,
        SubmissionError::SignatureDenied(_) => StatusCode::FORBIDDEN,
        SubmissionError::InvalidOption { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SubmissionError::SubmissionFailed(_) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_status_mapping() {
        assert_eq!(
            submission_status(&SubmissionError::WalletNotConnected),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            submission_status(&SubmissionError::InvalidOption {
                poll_id: "p1".into(),
                option: "maybe".into()
            }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            submission_status(&SubmissionError::SubmissionFailed("Invalid signature".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}
