//! In-process vote ledger
//!
//! Implements the vote backend contract against an in-memory store keyed on
//! (poll, voter), and serves the resulting tallies as a `TallySource`. Used
//! for local runs and as the reference the HTTP backend is tested against.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{info, warn};

use super::backend::{VoteBackend, VoteReceipt, VoteRequest};
use crate::config::sanitize_for_logging;
use crate::crypto::{decode_signature, verify_signature, vote_message};
use crate::models::{PollRecord, TallyReading, VoteAction, VoteRecord};
use crate::oracle::TallySource;

#[derive(Default)]
struct LedgerState {
    polls: HashMap<String, PollRecord>,
    /// poll_id -> voter -> active vote
    votes: HashMap<String, HashMap<String, VoteRecord>>,
}

pub struct InMemoryVoteLedger {
    state: RwLock<LedgerState>,
    verify_signatures: bool,
}

impl Default for InMemoryVoteLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryVoteLedger {
    /// Ledger that checks every signature against the voter address
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            verify_signatures: true,
        }
    }

    /// Ledger that trusts signatures as given
    pub fn without_signature_checks() -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            verify_signatures: false,
        }
    }

    pub fn register_poll(&self, poll: PollRecord) {
        let mut state = self.state.write();
        state.votes.entry(poll.poll_id.clone()).or_default();
        state.polls.insert(poll.poll_id.clone(), poll);
    }

    pub fn votes_for(&self, poll_id: &str) -> Vec<VoteRecord> {
        let state = self.state.read();
        let mut votes: Vec<VoteRecord> = state
            .votes
            .get(poll_id)
            .map(|v| v.values().cloned().collect())
            .unwrap_or_default();
        votes.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        votes
    }

    fn signature_valid(&self, request: &VoteRequest) -> bool {
        if !self.verify_signatures {
            return true;
        }

        let message = vote_message(&request.poll_id, &request.vote_option);
        decode_signature(&request.signature)
            .and_then(|sig| verify_signature(&request.wallet_address, message.as_bytes(), &sig))
            .unwrap_or(false)
    }

    /// Apply a submission. Check and write happen under one lock.
    pub fn record(&self, request: &VoteRequest) -> VoteReceipt {
        if !self.signature_valid(request) {
            warn!(
                poll_id = %request.poll_id,
                voter = %sanitize_for_logging(&request.wallet_address),
                "Rejected vote with invalid signature"
            );
            return VoteReceipt::rejected("Invalid signature");
        }

        let mut state = self.state.write();

        let Some(poll) = state.polls.get(&request.poll_id) else {
            return VoteReceipt::rejected("Poll not found");
        };
        if !poll.accepts(&request.vote_option) {
            return VoteReceipt::rejected(format!("Invalid option: {}", request.vote_option));
        }

        let record = VoteRecord {
            poll_id: request.poll_id.clone(),
            voter: request.wallet_address.clone(),
            option: request.vote_option.clone(),
            signature: request.signature.clone(),
            wallet_age_days: request.wallet_age_days,
            balance: request.sol_balance,
            submitted_at: Utc::now(),
        };

        let votes = state.votes.entry(request.poll_id.clone()).or_default();
        let receipt = match votes.get(&request.wallet_address) {
            Some(existing) if existing.option == request.vote_option => {
                VoteReceipt::accepted(VoteAction::Unchanged, Some(existing.option.clone()))
            }
            Some(existing) => {
                let previous = existing.option.clone();
                votes.insert(request.wallet_address.clone(), record);
                VoteReceipt::accepted(VoteAction::Changed, Some(previous))
            }
            None => {
                votes.insert(request.wallet_address.clone(), record);
                VoteReceipt::accepted(VoteAction::New, None)
            }
        };

        info!(
            poll_id = %request.poll_id,
            voter = %sanitize_for_logging(&request.wallet_address),
            action = ?receipt.vote_action,
            "Vote applied"
        );
        receipt
    }
}

#[async_trait]
impl VoteBackend for InMemoryVoteLedger {
    async fn submit_vote(&self, request: &VoteRequest) -> Result<VoteReceipt> {
        Ok(self.record(request))
    }
}

#[async_trait]
impl TallySource for InMemoryVoteLedger {
    async fn fetch_tally(&self, poll_id: &str) -> Result<TallyReading> {
        let state = self.state.read();
        let poll = state
            .polls
            .get(poll_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Poll not found: {}", poll_id))?;

        let counts = state
            .votes
            .get(poll_id)
            .into_iter()
            .flat_map(|votes| votes.values())
            .map(|vote| (vote.option.clone(), 1u64));

        Ok(TallyReading::new(poll, counts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{WalletKeypair, encode_signature};

    fn ledger() -> InMemoryVoteLedger {
        let ledger = InMemoryVoteLedger::new();
        ledger.register_poll(PollRecord::new("p1", "Raise rewards?", ["yes", "no", "abstain"]));
        ledger
    }

    fn signed(keypair: &WalletKeypair, poll_id: &str, option: &str) -> VoteRequest {
        let message = vote_message(poll_id, option);
        VoteRequest {
            poll_id: poll_id.into(),
            wallet_address: keypair.address(),
            vote_option: option.into(),
            signature: encode_signature(&keypair.sign(message.as_bytes())),
            wallet_age_days: Some(0),
            sol_balance: Some(1.0),
        }
    }

    #[tokio::test]
    async fn test_new_changed_unchanged() {
        let ledger = ledger();
        let voter = WalletKeypair::generate();

        let first = ledger.record(&signed(&voter, "p1", "yes"));
        assert_eq!(first.vote_action, Some(VoteAction::New));

        let second = ledger.record(&signed(&voter, "p1", "no"));
        assert_eq!(second.vote_action, Some(VoteAction::Changed));
        assert_eq!(second.previous_option.as_deref(), Some("yes"));

        let third = ledger.record(&signed(&voter, "p1", "no"));
        assert_eq!(third.vote_action, Some(VoteAction::Unchanged));

        assert_eq!(ledger.votes_for("p1").len(), 1);
        let reading = ledger.fetch_tally("p1").await.unwrap();
        assert_eq!(reading.counts["no"], 1);
        assert_eq!(reading.counts["yes"], 0);
        assert_eq!(reading.total(), 1);
    }

    #[test]
    fn test_rejections() {
        let ledger = ledger();
        let voter = WalletKeypair::generate();

        let mut forged = signed(&voter, "p1", "yes");
        forged.vote_option = "no".into();
        assert_eq!(ledger.record(&forged).error.as_deref(), Some("Invalid signature"));

        assert!(!ledger.record(&signed(&voter, "p1", "maybe")).success);
        assert!(!ledger.record(&signed(&voter, "p9", "yes")).success);
        assert!(ledger.votes_for("p1").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_poll_tally_fails() {
        assert!(ledger().fetch_tally("p9").await.is_err());
    }
}
