//! Vote backend contract
//!
//! The backend stores at most one vote per (poll, voter). A submission is
//! classified as `new`, `changed` (with the previous option) or `unchanged`
//! (same option resubmitted, nothing counted twice).

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::VoteAction;
use crate::oracle::{OracleHttpClient, http::endpoint};

/// Body of `POST /api/vote`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub poll_id: String,
    pub wallet_address: String,
    pub vote_option: String,
    /// Base64 signature over the canonical vote message
    pub signature: String,
    pub wallet_age_days: Option<u32>,
    pub sol_balance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub success: bool,
    pub vote_action: Option<VoteAction>,
    #[serde(alias = "previous_vote", default)]
    pub previous_option: Option<String>,
    #[serde(alias = "detail", default)]
    pub error: Option<String>,
}

impl VoteReceipt {
    pub fn accepted(action: VoteAction, previous_option: Option<String>) -> Self {
        Self {
            success: true,
            vote_action: Some(action),
            previous_option,
            error: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            vote_action: None,
            previous_option: None,
            error: Some(reason.into()),
        }
    }

    /// Final classification of an accepted submission of `option`.
    ///
    /// Backends that never report `unchanged` still answer `changed` with the
    /// previous option; a previous option equal to the submitted one is read
    /// as unchanged.
    pub fn action_for(&self, option: &str) -> VoteAction {
        match (self.vote_action, self.previous_option.as_deref()) {
            (Some(VoteAction::Unchanged), _) => VoteAction::Unchanged,
            (_, Some(previous)) if previous == option => VoteAction::Unchanged,
            (_, Some(_)) => VoteAction::Changed,
            (Some(action), None) => action,
            (None, None) => VoteAction::New,
        }
    }
}

#[async_trait]
pub trait VoteBackend: Send + Sync {
    async fn submit_vote(&self, request: &VoteRequest) -> Result<VoteReceipt>;
}

pub struct HttpVoteBackend {
    http: OracleHttpClient,
    base_url: String,
}

impl HttpVoteBackend {
    pub fn new(http: OracleHttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl VoteBackend for HttpVoteBackend {
    async fn submit_vote(&self, request: &VoteRequest) -> Result<VoteReceipt> {
        let url = endpoint(&self.base_url, "/api/vote");
        let receipt: VoteReceipt = self
            .http
            .post_json(&url, request)
            .await
            .context("Vote submission request failed")?;

        debug!(
            poll_id = %request.poll_id,
            success = receipt.success,
            action = ?receipt.vote_action,
            "Vote backend answered"
        );
        Ok(receipt)
    }
}
