//! Vote Submission Protocol
//!
//! Signs a voter's choice, submits it to the vote backend and reconciles the
//! result with local state. Failures are terminal for the attempt and leave
//! local state untouched; nothing here retries.
//!
//! On an accepted vote that moved the tally, the poll gets exactly one
//! out-of-band sync refresh request and one consensus invalidation.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use super::backend::{VoteBackend, VoteRequest};
use crate::config::sanitize_for_logging;
use crate::consensus::ConsensusAggregator;
use crate::crypto::{encode_signature, vote_message};
use crate::models::{PollRecord, VoteAction};
use crate::sync::SyncEngine;
use crate::wallet::{WalletError, WalletSessionManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    WalletNotConnected,
    SignatureDenied(String),
    InvalidOption { poll_id: String, option: String },
    SubmissionFailed(String),
}

impl std::fmt::Display for SubmissionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionError::WalletNotConnected => write!(f, "Wallet not connected"),
            SubmissionError::SignatureDenied(reason) => write!(f, "Signature denied: {}", reason),
            SubmissionError::InvalidOption { poll_id, option } => {
                write!(f, "Option '{}' is not valid for poll {}", option, poll_id)
            }
            SubmissionError::SubmissionFailed(reason) => write!(f, "Vote submission failed: {}", reason),
        }
    }
}

impl std::error::Error for SubmissionError {}

#[derive(Debug, Clone, Serialize)]
pub struct VoteOutcome {
    pub poll_id: String,
    pub option: String,
    pub action: VoteAction,
    pub previous_option: Option<String>,
    /// Whether an immediate sync refresh was requested
    pub refresh_requested: bool,
    pub submitted_at: DateTime<Utc>,
}

pub struct VoteSubmitter {
    wallet: Arc<WalletSessionManager>,
    backend: Arc<dyn VoteBackend>,
    sync: Arc<SyncEngine>,
    consensus: Arc<ConsensusAggregator>,
    /// (voter address, poll_id) -> option; a cache of our own accepted votes
    my_votes: RwLock<HashMap<(String, String), String>>,
    timeout: Duration,
}

impl VoteSubmitter {
    pub fn new(
        wallet: Arc<WalletSessionManager>,
        backend: Arc<dyn VoteBackend>,
        sync: Arc<SyncEngine>,
        consensus: Arc<ConsensusAggregator>,
        timeout: Duration,
    ) -> Self {
        Self {
            wallet,
            backend,
            sync,
            consensus,
            my_votes: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub async fn submit(&self, poll: &PollRecord, option: &str) -> Result<VoteOutcome, SubmissionError> {
        let session = self
            .wallet
            .session()
            .await
            .ok_or(SubmissionError::WalletNotConnected)?;

        if !poll.accepts(option) {
            return Err(SubmissionError::InvalidOption {
                poll_id: poll.poll_id.clone(),
                option: option.to_string(),
            });
        }

        let message = vote_message(&poll.poll_id, option);
        let signed = match timeout(self.timeout, self.wallet.sign(message.as_bytes())).await {
            Ok(Ok(signed)) => signed,
            Ok(Err(WalletError::NotConnected)) => return Err(SubmissionError::WalletNotConnected),
            Ok(Err(other)) => return Err(SubmissionError::SignatureDenied(other.to_string())),
            Err(_) => {
                return Err(SubmissionError::SignatureDenied(
                    "Signing request timed out".to_string(),
                ));
            }
        };

        let request = VoteRequest {
            poll_id: poll.poll_id.clone(),
            wallet_address: signed.address.clone(),
            vote_option: option.to_string(),
            signature: encode_signature(&signed.signature),
            wallet_age_days: Some(session.age_days),
            sol_balance: Some(session.balance),
        };

        let receipt = match timeout(self.timeout, self.backend.submit_vote(&request)).await {
            Ok(Ok(receipt)) if receipt.success => receipt,
            Ok(Ok(receipt)) => {
                let reason = receipt
                    .error
                    .unwrap_or_else(|| "Vote rejected by backend".to_string());
                warn!(poll_id = %poll.poll_id, "Vote rejected: {}", reason);
                return Err(SubmissionError::SubmissionFailed(reason));
            }
            Ok(Err(e)) => {
                warn!(poll_id = %poll.poll_id, "Vote submission failed: {:#}", e);
                return Err(SubmissionError::SubmissionFailed(format!("{:#}", e)));
            }
            Err(_) => {
                warn!(poll_id = %poll.poll_id, "Vote submission timed out");
                return Err(SubmissionError::SubmissionFailed(format!(
                    "Vote submission timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        let action = receipt.action_for(option);

        self.my_votes.write().insert(
            (signed.address.clone(), poll.poll_id.clone()),
            option.to_string(),
        );

        let refresh_requested = if action.mutates_tally() {
            self.consensus.invalidate(&poll.poll_id);
            self.sync.request_refresh(&poll.poll_id)
        } else {
            false
        };

        info!(
            poll_id = %poll.poll_id,
            voter = %sanitize_for_logging(&signed.address),
            option = %option,
            action = ?action,
            "Vote accepted"
        );

        Ok(VoteOutcome {
            poll_id: poll.poll_id.clone(),
            option: option.to_string(),
            action,
            previous_option: receipt.previous_option.filter(|_| action == VoteAction::Changed),
            refresh_requested,
            submitted_at: Utc::now(),
        })
    }

    /// The connected wallet's last accepted vote on `poll_id`
    pub async fn my_vote(&self, poll_id: &str) -> Option<String> {
        let session = self.wallet.session().await?;
        self.my_votes
            .read()
            .get(&(session.address, poll_id.to_string()))
            .cloned()
    }
}
